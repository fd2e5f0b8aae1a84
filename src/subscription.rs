use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::balance::{CreditsBalance, NewCreditTransaction};
use crate::catalog::{BillingType, PlanKind};
use crate::error::BillingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "inactive" => Some(SubscriptionStatus::Inactive),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }
}

/// One row per user. The credit balance lives on the subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    pub user_id: String,
    pub plan: PlanKind,
    pub billing_type: BillingType,
    pub status: SubscriptionStatus,
    pub renew_at: Option<DateTime<Utc>>,
    pub credits_remaining: i64,
    pub credits_total: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Initial state at signup: free plan, free allotment, nothing to renew.
    pub fn new_free(user_id: &str, free_credits: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            plan: PlanKind::Free,
            billing_type: BillingType::Monthly,
            status: SubscriptionStatus::Active,
            renew_at: None,
            credits_remaining: free_credits,
            credits_total: free_credits,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn balance(&self) -> CreditsBalance {
        let available = self.credits_remaining.max(0);
        let total = self.credits_total.max(available);
        CreditsBalance {
            total_credits: total,
            used_credits: total - available,
            available_credits: available,
        }
    }

    /// Due when the renewal date has been reached; a paid row with no date is due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.renew_at.is_none_or(|at| at <= now)
    }

    pub fn is_renewal_candidate(&self) -> bool {
        self.plan.is_paid()
            && matches!(
                self.status,
                SubscriptionStatus::Active | SubscriptionStatus::Cancelled
            )
    }
}

/// One listed renewal candidate. A row that fails to decode keeps its
/// user id so the sweep can report it and carry on with the others.
#[derive(Debug)]
pub enum CandidateRow {
    Ready(Subscription),
    Unreadable { user_id: String, error: BillingError },
}

impl CandidateRow {
    pub fn user_id(&self) -> &str {
        match self {
            CandidateRow::Ready(sub) => &sub.user_id,
            CandidateRow::Unreadable { user_id, .. } => user_id,
        }
    }
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, BillingError>;

    /// Inserts `initial` unless a row for the user exists, then returns the
    /// stored row. Concurrent callers all observe the first writer's row.
    async fn insert_subscription_if_absent(
        &self,
        initial: &Subscription,
    ) -> Result<Subscription, BillingError>;

    /// Writes `next` only if the stored version still equals
    /// `expected_version`, bumping it to `expected_version + 1` and appending
    /// `entry` to the journal in the same unit of work. Returns `false` on a
    /// version mismatch or a missing row.
    async fn compare_and_swap(
        &self,
        next: &Subscription,
        expected_version: i64,
        entry: Option<&NewCreditTransaction>,
    ) -> Result<bool, BillingError>;

    /// Non-free subscriptions in `active` or `cancelled` status.
    async fn list_renewal_candidates(&self) -> Result<Vec<CandidateRow>, BillingError>;
}
