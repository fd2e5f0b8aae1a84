use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::balance::{CreditJournal, CreditTransaction, CreditsBalance, NewCreditTransaction, TransactionKind};
use crate::catalog::{BillingType, CreditAction, PlanCatalog, PlanKind};
use crate::error::{BillingError, Result};
use crate::storage::Stores;
use crate::storage::time::same_day_months_after;
use crate::subscription::{Subscription, SubscriptionStatus, SubscriptionStore};

/// Attempts per mutation before giving up with `Conflict`.
pub const MAX_CAS_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductOutcome {
    Success { remaining: i64 },
    Insufficient { available: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpendResult {
    pub success: bool,
    pub remaining_credits: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatusView {
    pub plan: PlanKind,
    pub plan_name: &'static str,
    pub billing_type: BillingType,
    pub price_cents: i64,
    pub status: SubscriptionStatus,
    pub renew_at: Option<DateTime<Utc>>,
    pub credits: CreditsBalance,
}

/// Result of one transition over the freshly read row.
pub(crate) enum Step<T> {
    Write {
        next: Subscription,
        entry: NewCreditTransaction,
        out: T,
    },
    Done(T),
}

/// Balance and plan mutations for one user at a time. Every write is a
/// compare-and-swap on the subscription version plus one journal row.
#[derive(Clone)]
pub struct CreditLedger {
    subscriptions: Arc<dyn SubscriptionStore>,
    journal: Arc<dyn CreditJournal>,
    catalog: Arc<PlanCatalog>,
    offset: FixedOffset,
}

impl CreditLedger {
    pub fn new(stores: &Stores, catalog: Arc<PlanCatalog>, offset: FixedOffset) -> Self {
        Self {
            subscriptions: stores.subscriptions.clone(),
            journal: stores.journal.clone(),
            catalog,
            offset,
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub(crate) fn offset(&self) -> &FixedOffset {
        &self.offset
    }

    pub async fn subscription(&self, user_id: &str) -> Result<Option<Subscription>> {
        self.subscriptions.get_subscription(user_id).await
    }

    /// Available credits; 0 when the user has no record yet.
    pub async fn get_balance(&self, user_id: &str) -> Result<i64> {
        let sub = self.subscriptions.get_subscription(user_id).await?;
        Ok(sub.map(|s| s.credits_remaining.max(0)).unwrap_or(0))
    }

    /// Provisions the free subscription unless one exists; concurrent
    /// callers get the same row back.
    pub async fn ensure_account(&self, user_id: &str) -> Result<Subscription> {
        let initial = Subscription::new_free(user_id, self.catalog.free_credits(), Utc::now());
        self.subscriptions.insert_subscription_if_absent(&initial).await
    }

    pub async fn deduct(&self, user_id: &str, amount: i64) -> Result<DeductOutcome> {
        if amount <= 0 {
            return Err(BillingError::BadRequest(format!(
                "amount must be positive, got {amount}"
            )));
        }
        let res = self
            .mutate(user_id, |sub| {
                let available = sub.credits_remaining.max(0);
                if available < amount {
                    return Ok(Step::Done(DeductOutcome::Insufficient { available }));
                }
                let remaining = available - amount;
                let mut next = sub.clone();
                next.credits_remaining = remaining;
                next.updated_at = Utc::now();
                Ok(Step::Write {
                    next,
                    entry: NewCreditTransaction {
                        kind: TransactionKind::Spend,
                        amount: -amount,
                        balance_after: remaining,
                        meta: None,
                    },
                    out: DeductOutcome::Success { remaining },
                })
            })
            .await;
        match res {
            Err(BillingError::SubscriptionNotFound(_)) => {
                Ok(DeductOutcome::Insufficient { available: 0 })
            }
            other => other,
        }
    }

    /// Adds credits, provisioning the free record first when absent.
    /// Returns the new balance.
    pub async fn add(&self, user_id: &str, amount: i64, reason: Option<&str>) -> Result<i64> {
        if amount <= 0 {
            return Err(BillingError::BadRequest(format!(
                "amount must be positive, got {amount}"
            )));
        }
        self.ensure_account(user_id).await?;
        let balance = self
            .mutate(user_id, |sub| {
                let balance = sub
                    .credits_remaining
                    .max(0)
                    .checked_add(amount)
                    .ok_or_else(|| BillingError::BadRequest("credit balance overflow".into()))?;
                let mut next = sub.clone();
                next.credits_remaining = balance;
                next.credits_total = next.credits_total.max(balance);
                next.updated_at = Utc::now();
                Ok(Step::Write {
                    next,
                    entry: NewCreditTransaction {
                        kind: TransactionKind::Grant,
                        amount,
                        balance_after: balance,
                        meta: reason.map(str::to_string),
                    },
                    out: balance,
                })
            })
            .await?;
        tracing::info!(user_id = %user_id, amount, balance, "credits granted");
        Ok(balance)
    }

    /// Moves the user to `plan`, active, with a fresh allotment and the
    /// next renewal one cycle from `now`.
    pub async fn set_plan(
        &self,
        user_id: &str,
        plan: PlanKind,
        billing: BillingType,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let billing = if plan.is_paid() { billing } else { BillingType::Monthly };
        let credits = self.catalog.credits_for(plan, billing);
        let renew_at = plan
            .is_paid()
            .then(|| same_day_months_after(now, now, billing.cycle_months(), &self.offset));
        let sub = self
            .mutate(user_id, |sub| {
                let mut next = sub.clone();
                next.plan = plan;
                next.billing_type = billing;
                next.status = SubscriptionStatus::Active;
                next.renew_at = renew_at;
                next.credits_remaining = credits;
                next.credits_total = credits;
                next.updated_at = now;
                let entry = NewCreditTransaction {
                    kind: TransactionKind::PlanChange,
                    amount: credits - sub.credits_remaining,
                    balance_after: credits,
                    meta: Some(format!("{} {}", plan.as_str(), billing.as_str())),
                };
                let mut out = next.clone();
                out.version = sub.version + 1;
                Ok(Step::Write { next, entry, out })
            })
            .await?;
        tracing::info!(
            user_id = %user_id,
            plan = plan.as_str(),
            billing = billing.as_str(),
            "plan changed"
        );
        Ok(sub)
    }

    pub async fn spend_credits(&self, user_id: &str, amount: i64) -> Result<SpendResult> {
        Ok(match self.deduct(user_id, amount).await? {
            DeductOutcome::Success { remaining } => SpendResult {
                success: true,
                remaining_credits: remaining,
                error: None,
            },
            DeductOutcome::Insufficient { available } => {
                tracing::debug!(user_id = %user_id, amount, available, "insufficient credits");
                SpendResult {
                    success: false,
                    remaining_credits: available,
                    error: Some(
                        BillingError::InsufficientCredits {
                            required: amount,
                            available,
                        }
                        .to_string(),
                    ),
                }
            }
        })
    }

    pub async fn spend_action(&self, user_id: &str, action: CreditAction) -> Result<SpendResult> {
        self.spend_credits(user_id, self.catalog.cost_of(action)).await
    }

    pub async fn upgrade_plan(
        &self,
        user_id: &str,
        plan: PlanKind,
        billing: BillingType,
    ) -> Result<Subscription> {
        self.ensure_account(user_id).await?;
        self.set_plan(user_id, plan, billing, Utc::now()).await
    }

    /// Stops renewal at the end of the paid period. Plan, credits and
    /// renewal date stay until the sweep downgrades the row.
    pub async fn cancel(&self, user_id: &str, now: DateTime<Utc>) -> Result<Subscription> {
        self.mutate(user_id, |sub| {
            if !sub.plan.is_paid() {
                return Err(BillingError::Conflict(
                    "free plan has no subscription to cancel".into(),
                ));
            }
            if sub.status != SubscriptionStatus::Active {
                return Err(BillingError::Conflict(format!(
                    "subscription is {}",
                    sub.status.as_str()
                )));
            }
            let mut next = sub.clone();
            next.status = SubscriptionStatus::Cancelled;
            next.updated_at = now;
            let entry = NewCreditTransaction {
                kind: TransactionKind::PlanChange,
                amount: 0,
                balance_after: next.credits_remaining,
                meta: Some("cancelled".into()),
            };
            let mut out = next.clone();
            out.version = sub.version + 1;
            Ok(Step::Write { next, entry, out })
        })
        .await
    }

    pub async fn status(&self, user_id: &str) -> Result<SubscriptionStatusView> {
        let sub = self
            .subscriptions
            .get_subscription(user_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;
        Ok(SubscriptionStatusView {
            plan: sub.plan,
            plan_name: sub.plan.display_name(),
            billing_type: sub.billing_type,
            price_cents: self.catalog.price_cents_for(sub.plan, sub.billing_type),
            status: sub.status,
            renew_at: sub.renew_at,
            credits: sub.balance(),
        })
    }

    pub async fn transactions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CreditTransaction>> {
        self.journal
            .list_transactions(user_id, limit.clamp(1, 200), offset.max(0))
            .await
    }

    /// Read, transition, compare-and-swap; retried while other writers win.
    pub(crate) async fn mutate<T, F>(&self, user_id: &str, mut transition: F) -> Result<T>
    where
        F: FnMut(&Subscription) -> Result<Step<T>>,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let sub = self
                .subscriptions
                .get_subscription(user_id)
                .await?
                .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;
            match transition(&sub)? {
                Step::Done(out) => return Ok(out),
                Step::Write { next, entry, out } => {
                    if self
                        .subscriptions
                        .compare_and_swap(&next, sub.version, Some(&entry))
                        .await?
                    {
                        return Ok(out);
                    }
                    tracing::debug!(user_id = %user_id, attempt, "version moved, retrying");
                }
            }
        }
        Err(BillingError::Conflict(format!(
            "subscription of {user_id} kept changing"
        )))
    }
}
