use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;

use crate::error::BillingError;
use crate::payment::{Payment, PaymentStatus, PaymentStore};
use crate::storage::postgres::{PgStore, invalid_column};

const PAYMENT_COLUMNS: &str =
    "id, user_id, charge_id, plan, amount_cents, status, pix_payload, created_at, updated_at";

fn row_to_payment(row: &Row) -> Result<Payment, BillingError> {
    let status_s: String = row.try_get(5)?;
    Ok(Payment {
        id: row.try_get(0)?,
        user_id: row.try_get(1)?,
        charge_id: row.try_get(2)?,
        plan: row.try_get(3)?,
        amount_cents: row.try_get(4)?,
        status: PaymentStatus::parse(&status_s)
            .ok_or_else(|| invalid_column("status", &status_s))?,
        pix_payload: row.try_get(6)?,
        created_at: row.try_get(7)?,
        updated_at: row.try_get(8)?,
    })
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), BillingError> {
        let client = self.pool.pick();
        client
            .execute(
                "INSERT INTO payments (id, user_id, charge_id, plan, amount_cents, status, pix_payload, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &payment.id,
                    &payment.user_id,
                    &payment.charge_id,
                    &payment.plan,
                    &payment.amount_cents,
                    &payment.status.as_str(),
                    &payment.pix_payload,
                    &payment.created_at,
                    &payment.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_payment(&self, id: &str) -> Result<Option<Payment>, BillingError> {
        let client = self.pool.pick();
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let row = client.query_opt(&sql, &[&id]).await?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn find_pending_payment(
        &self,
        user_id: &str,
        plan: &str,
    ) -> Result<Option<Payment>, BillingError> {
        let client = self.pool.pick();
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE user_id = $1 AND plan = $2 AND status = 'pending'
             ORDER BY created_at DESC
             LIMIT 1"
        );
        let row = client.query_opt(&sql, &[&user_id, &plan]).await?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn update_payment_status(
        &self,
        id: &str,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, BillingError> {
        let client = self.pool.pick();
        let changed = client
            .execute(
                "UPDATE payments SET status = $2, updated_at = $3
                 WHERE id = $1 AND status <> 'approved'",
                &[&id, &status.as_str(), &now],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn has_approved_payment_between(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, BillingError> {
        let client = self.pool.pick();
        let row = client
            .query_opt(
                "SELECT 1 FROM payments
                 WHERE user_id = $1 AND status = 'approved'
                   AND created_at >= $2 AND created_at < $3
                 LIMIT 1",
                &[&user_id, &start, &end],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn list_payments(&self, user_id: &str, limit: i64) -> Result<Vec<Payment>, BillingError> {
        let client = self.pool.pick();
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2"
        );
        let rows = client.query(&sql, &[&user_id, &limit]).await?;
        rows.iter().map(row_to_payment).collect()
    }
}
