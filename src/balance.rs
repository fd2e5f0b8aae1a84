use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BillingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Grant,
    Spend,
    Renewal,
    PlanChange,
    Downgrade,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Grant => "grant",
            TransactionKind::Spend => "spend",
            TransactionKind::Renewal => "renewal",
            TransactionKind::PlanChange => "plan_change",
            TransactionKind::Downgrade => "downgrade",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grant" => Some(TransactionKind::Grant),
            "spend" => Some(TransactionKind::Spend),
            "renewal" => Some(TransactionKind::Renewal),
            "plan_change" => Some(TransactionKind::PlanChange),
            "downgrade" => Some(TransactionKind::Downgrade),
            _ => None,
        }
    }
}

/// Journal row to be written together with a balance mutation.
#[derive(Debug, Clone)]
pub struct NewCreditTransaction {
    pub kind: TransactionKind,
    /// Signed change applied to the balance.
    pub amount: i64,
    pub balance_after: i64,
    pub meta: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditTransaction {
    pub id: String,
    pub user_id: String,
    pub kind: TransactionKind,
    pub amount: i64,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
    pub meta: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreditsBalance {
    pub total_credits: i64,
    pub used_credits: i64,
    pub available_credits: i64,
}

#[async_trait]
pub trait CreditJournal: Send + Sync {
    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CreditTransaction>, BillingError>;
}
