use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use crate::error::BillingError;
use crate::payment::{Payment, PaymentStatus, PaymentStore};
use crate::storage::sqlite::{SqliteStore, invalid_text, time_column};
use crate::storage::time::to_db_string;

const PAYMENT_COLUMNS: &str =
    "id, user_id, charge_id, plan, amount_cents, status, pix_payload, created_at, updated_at";

fn row_to_payment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Payment> {
    let status_s: String = row.get(5)?;
    let created_at_s: String = row.get(7)?;
    let updated_at_s: String = row.get(8)?;
    Ok(Payment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        charge_id: row.get(2)?,
        plan: row.get(3)?,
        amount_cents: row.get(4)?,
        status: PaymentStatus::parse(&status_s).ok_or_else(|| invalid_text(5, "status"))?,
        pix_payload: row.get(6)?,
        created_at: time_column(7, &created_at_s)?,
        updated_at: time_column(8, &updated_at_s)?,
    })
}

#[async_trait]
impl PaymentStore for SqliteStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), BillingError> {
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO payments (id, user_id, charge_id, plan, amount_cents, status, pix_payload, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                &payment.id,
                &payment.user_id,
                &payment.charge_id,
                &payment.plan,
                payment.amount_cents,
                payment.status.as_str(),
                &payment.pix_payload,
                to_db_string(&payment.created_at),
                to_db_string(&payment.updated_at),
            ],
        )?;
        Ok(())
    }

    async fn get_payment(&self, id: &str) -> Result<Option<Payment>, BillingError> {
        let conn = self.connection.lock().await;
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1");
        Ok(conn.query_row(&sql, [id], row_to_payment).optional()?)
    }

    async fn find_pending_payment(
        &self,
        user_id: &str,
        plan: &str,
    ) -> Result<Option<Payment>, BillingError> {
        let conn = self.connection.lock().await;
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE user_id = ?1 AND plan = ?2 AND status = 'pending'
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1"
        );
        Ok(conn
            .query_row(&sql, [user_id, plan], row_to_payment)
            .optional()?)
    }

    async fn update_payment_status(
        &self,
        id: &str,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, BillingError> {
        let conn = self.connection.lock().await;
        let changed = conn.execute(
            "UPDATE payments SET status = ?2, updated_at = ?3
             WHERE id = ?1 AND status != 'approved'",
            rusqlite::params![id, status.as_str(), to_db_string(&now)],
        )?;
        Ok(changed > 0)
    }

    async fn has_approved_payment_between(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, BillingError> {
        let conn = self.connection.lock().await;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM payments
                 WHERE user_id = ?1 AND status = 'approved'
                   AND created_at >= ?2 AND created_at < ?3
                 LIMIT 1",
                rusqlite::params![user_id, to_db_string(&start), to_db_string(&end)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn list_payments(&self, user_id: &str, limit: i64) -> Result<Vec<Payment>, BillingError> {
        let conn = self.connection.lock().await;
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params![user_id, limit], row_to_payment)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}
