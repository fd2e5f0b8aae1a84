use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;

use crate::balance::{NewCreditTransaction, TransactionKind};
use crate::catalog::{BillingType, PlanKind};
use crate::correlator::PaymentCorrelator;
use crate::error::{BillingError, Result};
use crate::ledger::{CreditLedger, Step};
use crate::storage::time::same_day_months_after;
use crate::subscription::{CandidateRow, Subscription, SubscriptionStatus, SubscriptionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepStage {
    Lookup,
    Apply,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepError {
    pub user_id: String,
    pub stage: SweepStage,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub checked: usize,
    pub renewed: usize,
    pub expired: usize,
    pub skipped: usize,
    pub errors: Vec<SweepError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Renewed,
    Expired,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Renew,
    Expire,
    // cancelled subscription reached its renewal date
    Downgrade,
}

/// Periodic pass over paid subscriptions: renews the ones with a payment
/// in the current billing window and downgrades the rest to free.
#[derive(Clone)]
pub struct RenewalReconciler {
    subscriptions: Arc<dyn SubscriptionStore>,
    ledger: CreditLedger,
    correlator: PaymentCorrelator,
    concurrency: usize,
}

impl RenewalReconciler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        ledger: CreditLedger,
        correlator: PaymentCorrelator,
        concurrency: usize,
    ) -> Self {
        Self {
            subscriptions,
            ledger,
            correlator,
            concurrency: concurrency.max(1),
        }
    }

    /// Only a failure to list candidates fails the sweep; per-subscription
    /// failures are collected in the report.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let candidates = self.subscriptions.list_renewal_candidates().await?;
        let mut report = SweepReport {
            started_at: now,
            checked: candidates.len(),
            renewed: 0,
            expired: 0,
            skipped: 0,
            errors: Vec::new(),
        };

        let results: Vec<std::result::Result<Outcome, SweepError>> = stream::iter(candidates)
            .map(|row| self.process(row, now))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for res in results {
            match res {
                Ok(Outcome::Renewed) => report.renewed += 1,
                Ok(Outcome::Expired) => report.expired += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(
                        user_id = %e.user_id,
                        stage = ?e.stage,
                        "renewal failed: {}",
                        e.message
                    );
                    report.errors.push(e);
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            renewed = report.renewed,
            expired = report.expired,
            skipped = report.skipped,
            errors = report.errors.len(),
            "renewal sweep finished"
        );
        Ok(report)
    }

    async fn process(
        &self,
        row: CandidateRow,
        now: DateTime<Utc>,
    ) -> std::result::Result<Outcome, SweepError> {
        let sub = match row {
            CandidateRow::Ready(sub) => sub,
            CandidateRow::Unreadable { user_id, error } => {
                return Err(SweepError {
                    user_id,
                    stage: SweepStage::Lookup,
                    message: error.to_string(),
                });
            }
        };
        if !sub.is_due(now) {
            return Ok(Outcome::Skipped);
        }
        let decision = if sub.status == SubscriptionStatus::Cancelled {
            Decision::Downgrade
        } else {
            let window = self.correlator.current_window(now);
            match self.correlator.has_qualifying_payment(&sub.user_id, &window).await {
                Ok(true) => Decision::Renew,
                Ok(false) => Decision::Expire,
                Err(e) => {
                    return Err(SweepError {
                        user_id: sub.user_id,
                        stage: SweepStage::Lookup,
                        message: e.to_string(),
                    });
                }
            }
        };

        let applied = self
            .ledger
            .mutate(&sub.user_id, |fresh| self.transition(&sub, fresh, decision, now))
            .await;
        match applied {
            Ok(outcome) => {
                if outcome != Outcome::Skipped {
                    tracing::info!(
                        user_id = %sub.user_id,
                        plan = sub.plan.as_str(),
                        outcome = ?outcome,
                        "subscription reconciled"
                    );
                }
                Ok(outcome)
            }
            Err(e) => Err(SweepError {
                user_id: sub.user_id,
                stage: SweepStage::Apply,
                message: e.to_string(),
            }),
        }
    }

    /// Re-checks the decision against the fresh row so repeated or
    /// overlapping sweeps apply it at most once.
    fn transition(
        &self,
        seen: &Subscription,
        fresh: &Subscription,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<Step<Outcome>> {
        if !fresh.is_renewal_candidate() || !fresh.is_due(now) || fresh.status != seen.status {
            return Ok(Step::Done(Outcome::Skipped));
        }
        let catalog = self.ledger.catalog();
        let mut next = fresh.clone();
        next.updated_at = now;
        match decision {
            Decision::Renew => {
                let allotment = catalog.credits_for(fresh.plan, fresh.billing_type);
                let anchor = fresh.renew_at.unwrap_or(now);
                next.renew_at = Some(same_day_months_after(
                    anchor,
                    now,
                    fresh.billing_type.cycle_months(),
                    self.ledger.offset(),
                ));
                next.credits_remaining = fresh
                    .credits_remaining
                    .max(0)
                    .checked_add(allotment)
                    .ok_or_else(|| BillingError::BadRequest("credit balance overflow".into()))?;
                next.credits_total = next.credits_remaining;
                let entry = NewCreditTransaction {
                    kind: TransactionKind::Renewal,
                    amount: allotment,
                    balance_after: next.credits_remaining,
                    meta: Some(format!(
                        "{} {}",
                        fresh.plan.as_str(),
                        fresh.billing_type.as_str()
                    )),
                };
                Ok(Step::Write {
                    next,
                    entry,
                    out: Outcome::Renewed,
                })
            }
            Decision::Expire | Decision::Downgrade => {
                let free = catalog.free_credits();
                next.plan = PlanKind::Free;
                next.billing_type = BillingType::Monthly;
                next.status = if decision == Decision::Downgrade {
                    SubscriptionStatus::Inactive
                } else {
                    SubscriptionStatus::Expired
                };
                next.renew_at = None;
                next.credits_remaining = free;
                next.credits_total = free;
                let entry = NewCreditTransaction {
                    kind: TransactionKind::Downgrade,
                    amount: free - fresh.credits_remaining,
                    balance_after: free,
                    meta: Some(next.status.as_str().to_string()),
                };
                Ok(Step::Write {
                    next,
                    entry,
                    out: Outcome::Expired,
                })
            }
        }
    }
}
