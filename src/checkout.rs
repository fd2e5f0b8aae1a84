use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::catalog::{BillingType, PlanKind, parse_plan_label, plan_label};
use crate::error::{BillingError, Result};
use crate::gateway::{ChargeRequest, PaymentGateway};
use crate::ledger::CreditLedger;
use crate::payment::{Payment, PaymentStatus, PaymentStore};
use crate::subscription::SubscriptionStatus;

#[derive(Debug, Clone, Serialize)]
pub struct PixCharge {
    pub payment_id: String,
    pub pix_payload: Option<String>,
    pub qr_image: Option<String>,
    pub amount_cents: i64,
    pub reused: bool,
}

/// PIX checkout: creates charges at the gateway and folds their outcome
/// back into the payment records and the user's plan.
#[derive(Clone)]
pub struct Checkout {
    payments: Arc<dyn PaymentStore>,
    ledger: CreditLedger,
    gateway: Option<Arc<dyn PaymentGateway>>,
}

impl Checkout {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        ledger: CreditLedger,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        Self {
            payments,
            ledger,
            gateway,
        }
    }

    fn gateway(&self) -> Result<&Arc<dyn PaymentGateway>> {
        self.gateway
            .as_ref()
            .ok_or_else(|| BillingError::ConfigurationMissing("payment gateway".into()))
    }

    pub async fn create_pix_charge(
        &self,
        user_id: &str,
        email: Option<&str>,
        plan: PlanKind,
        billing: BillingType,
        now: DateTime<Utc>,
    ) -> Result<PixCharge> {
        if !plan.is_paid() {
            return Err(BillingError::BadRequest(
                "only paid plans can be purchased".into(),
            ));
        }
        let label = plan_label(plan, billing);
        if let Some(existing) = self.payments.find_pending_payment(user_id, &label).await? {
            if existing.pix_payload.is_some() {
                tracing::debug!(user_id = %user_id, payment_id = %existing.id, "reusing pending charge");
                return Ok(PixCharge {
                    payment_id: existing.id,
                    pix_payload: existing.pix_payload,
                    qr_image: None,
                    amount_cents: existing.amount_cents,
                    reused: true,
                });
            }
        }

        let gateway = self.gateway()?;
        let amount_cents = self.ledger.catalog().price_cents_for(plan, billing);
        let charge = gateway
            .create_charge(&ChargeRequest {
                customer: email.unwrap_or_default().to_string(),
                amount_cents,
                due_date: (now + Duration::hours(24)).date_naive(),
                description: format!("{} plan ({})", plan.display_name(), billing.as_str()),
                external_reference: user_id.to_string(),
            })
            .await?;

        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            charge_id: Some(charge.charge_id),
            plan: label,
            amount_cents,
            status: PaymentStatus::Pending,
            pix_payload: charge.pix_payload.clone(),
            created_at: now,
            updated_at: now,
        };
        self.payments.insert_payment(&payment).await?;
        tracing::info!(
            user_id = %user_id,
            payment_id = %payment.id,
            plan = %payment.plan,
            amount_cents,
            "pix charge created"
        );
        Ok(PixCharge {
            payment_id: payment.id,
            pix_payload: charge.pix_payload,
            qr_image: charge.qr_image,
            amount_cents,
            reused: false,
        })
    }

    /// Polls the gateway for a pending payment and records the result.
    /// The first approval moves the user onto the purchased plan unless
    /// they already hold it as an active subscription; renewals of an
    /// active plan are left to the sweep.
    pub async fn refresh_payment(
        &self,
        user_id: &str,
        payment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Payment> {
        let mut payment = self
            .payments
            .get_payment(payment_id)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or_else(|| BillingError::NotFound(format!("payment {payment_id}")))?;
        if payment.status != PaymentStatus::Pending {
            return Ok(payment);
        }
        let Some(charge_id) = payment.charge_id.clone() else {
            return Ok(payment);
        };

        let status = self.gateway()?.charge_status(&charge_id).await?;
        if status == PaymentStatus::Pending {
            return Ok(payment);
        }
        if !self
            .payments
            .update_payment_status(&payment.id, status, now)
            .await?
        {
            // Someone else already settled it.
            return self
                .payments
                .get_payment(&payment.id)
                .await?
                .ok_or_else(|| BillingError::NotFound(format!("payment {payment_id}")));
        }
        payment.status = status;
        payment.updated_at = now;
        tracing::info!(payment_id = %payment.id, status = status.as_str(), "payment settled");

        if status == PaymentStatus::Approved {
            self.apply_purchase(&payment, now).await?;
        }
        Ok(payment)
    }

    /// Most recent payments of the user, newest first.
    pub async fn payment_history(&self, user_id: &str, limit: i64) -> Result<Vec<Payment>> {
        self.payments.list_payments(user_id, limit.clamp(1, 100)).await
    }

    async fn apply_purchase(&self, payment: &Payment, now: DateTime<Utc>) -> Result<()> {
        let Some((plan, billing)) = parse_plan_label(&payment.plan) else {
            tracing::warn!(payment_id = %payment.id, plan = %payment.plan, "unknown plan label");
            return Ok(());
        };
        let current = self.ledger.ensure_account(&payment.user_id).await?;
        if current.plan == plan
            && current.billing_type == billing
            && current.status == SubscriptionStatus::Active
        {
            return Ok(());
        }
        self.ledger
            .set_plan(&payment.user_id, plan, billing, now)
            .await?;
        Ok(())
    }
}
