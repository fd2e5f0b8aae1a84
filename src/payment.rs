use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BillingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "approved" => Some(PaymentStatus::Approved),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: String,
    pub user_id: String,
    pub charge_id: Option<String>,
    /// Composite plan label, e.g. `"Premium - monthly"`.
    pub plan: String,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub pix_payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), BillingError>;

    async fn get_payment(&self, id: &str) -> Result<Option<Payment>, BillingError>;

    /// Most recent pending payment of the user for the given plan label.
    async fn find_pending_payment(
        &self,
        user_id: &str,
        plan: &str,
    ) -> Result<Option<Payment>, BillingError>;

    /// Moves a payment to `status`. Approved payments are never changed;
    /// returns `false` when nothing was updated.
    async fn update_payment_status(
        &self,
        id: &str,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, BillingError>;

    /// Whether an approved payment exists with `start <= created_at < end`.
    async fn has_approved_payment_between(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, BillingError>;

    async fn list_payments(&self, user_id: &str, limit: i64) -> Result<Vec<Payment>, BillingError>;
}
