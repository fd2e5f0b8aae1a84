use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::error::{BillingError, Result};
use crate::payment::PaymentStore;
use crate::storage::time::month_bounds;

/// Half-open interval `[start, end)` a renewal payment must fall in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BillingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Answers "did this user pay for the current period".
#[derive(Clone)]
pub struct PaymentCorrelator {
    payments: Arc<dyn PaymentStore>,
    offset: FixedOffset,
}

impl PaymentCorrelator {
    pub fn new(payments: Arc<dyn PaymentStore>, offset: FixedOffset) -> Self {
        Self { payments, offset }
    }

    /// Calendar month containing `now` in the billing zone.
    pub fn current_window(&self, now: DateTime<Utc>) -> BillingWindow {
        let (start, end) = month_bounds(now, &self.offset);
        BillingWindow { start, end }
    }

    /// Store failures surface as `PaymentLookup`.
    pub async fn has_qualifying_payment(
        &self,
        user_id: &str,
        window: &BillingWindow,
    ) -> Result<bool> {
        self.payments
            .has_approved_payment_between(user_id, window.start, window.end)
            .await
            .map_err(|e| BillingError::PaymentLookup(format!("{user_id}: {e}")))
    }
}
