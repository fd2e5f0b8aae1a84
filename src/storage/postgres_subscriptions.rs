use async_trait::async_trait;
use chrono::Utc;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::balance::{CreditJournal, CreditTransaction, NewCreditTransaction, TransactionKind};
use crate::catalog::{BillingType, PlanKind};
use crate::error::BillingError;
use crate::storage::postgres::{PgStore, invalid_column};
use crate::subscription::{CandidateRow, Subscription, SubscriptionStatus, SubscriptionStore};

const SUBSCRIPTION_COLUMNS: &str = "user_id, plan, billing_type, status, renew_at,
    credits_remaining, credits_total, version, created_at, updated_at";

fn row_to_subscription(row: &Row) -> Result<Subscription, BillingError> {
    let plan_s: String = row.try_get(1)?;
    let billing_s: String = row.try_get(2)?;
    let status_s: String = row.try_get(3)?;
    Ok(Subscription {
        user_id: row.try_get(0)?,
        plan: PlanKind::parse(&plan_s).ok_or_else(|| invalid_column("plan", &plan_s))?,
        billing_type: BillingType::parse(&billing_s)
            .ok_or_else(|| invalid_column("billing_type", &billing_s))?,
        status: SubscriptionStatus::parse(&status_s)
            .ok_or_else(|| invalid_column("status", &status_s))?,
        renew_at: row.try_get(4)?,
        credits_remaining: row.try_get(5)?,
        credits_total: row.try_get(6)?,
        version: row.try_get(7)?,
        created_at: row.try_get(8)?,
        updated_at: row.try_get(9)?,
    })
}

fn row_to_transaction(row: &Row) -> Result<CreditTransaction, BillingError> {
    let kind_s: String = row.try_get(2)?;
    Ok(CreditTransaction {
        id: row.try_get(0)?,
        user_id: row.try_get(1)?,
        kind: TransactionKind::parse(&kind_s).ok_or_else(|| invalid_column("kind", &kind_s))?,
        amount: row.try_get(3)?,
        balance_after: row.try_get(4)?,
        created_at: row.try_get(5)?,
        meta: row.try_get(6)?,
    })
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, BillingError> {
        let client = self.pool.pick();
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1");
        let row = client.query_opt(&sql, &[&user_id]).await?;
        row.as_ref().map(row_to_subscription).transpose()
    }

    async fn insert_subscription_if_absent(
        &self,
        initial: &Subscription,
    ) -> Result<Subscription, BillingError> {
        let client = self.pool.pick();
        let inserted = client
            .execute(
                "INSERT INTO subscriptions (user_id, plan, billing_type, status, renew_at,
                    credits_remaining, credits_total, version, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (user_id) DO NOTHING",
                &[
                    &initial.user_id,
                    &initial.plan.as_str(),
                    &initial.billing_type.as_str(),
                    &initial.status.as_str(),
                    &initial.renew_at,
                    &initial.credits_remaining,
                    &initial.credits_total,
                    &initial.version,
                    &initial.created_at,
                    &initial.updated_at,
                ],
            )
            .await?;
        if inserted > 0 {
            tracing::info!(user_id = %initial.user_id, "provisioned subscription");
        }
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1");
        let row = client.query_one(&sql, &[&initial.user_id]).await?;
        row_to_subscription(&row)
    }

    async fn compare_and_swap(
        &self,
        next: &Subscription,
        expected_version: i64,
        entry: Option<&NewCreditTransaction>,
    ) -> Result<bool, BillingError> {
        let client = self.pool.pick();
        let plan = next.plan.as_str();
        let billing = next.billing_type.as_str();
        let status = next.status.as_str();
        let changed = match entry {
            // The journal insert selects from the update: no matched row, no entry.
            Some(entry) => {
                let tx_id = Uuid::new_v4().to_string();
                let kind = entry.kind.as_str();
                let now = Utc::now();
                client
                    .execute(
                        "WITH upd AS (
                            UPDATE subscriptions
                            SET plan = $2, billing_type = $3, status = $4, renew_at = $5,
                                credits_remaining = $6, credits_total = $7,
                                version = $8::BIGINT + 1, updated_at = $9
                            WHERE user_id = $1 AND version = $8::BIGINT
                            RETURNING user_id
                         )
                         INSERT INTO credit_transactions (id, user_id, kind, amount, balance_after, created_at, meta)
                         SELECT $10::TEXT, user_id, $11::TEXT, $12::BIGINT, $13::BIGINT, $14::TIMESTAMPTZ, $15::TEXT FROM upd",
                        &[
                            &next.user_id,
                            &plan,
                            &billing,
                            &status,
                            &next.renew_at,
                            &next.credits_remaining,
                            &next.credits_total,
                            &expected_version,
                            &next.updated_at,
                            &tx_id,
                            &kind,
                            &entry.amount,
                            &entry.balance_after,
                            &now,
                            &entry.meta,
                        ],
                    )
                    .await?
            }
            None => {
                client
                    .execute(
                        "UPDATE subscriptions
                         SET plan = $2, billing_type = $3, status = $4, renew_at = $5,
                             credits_remaining = $6, credits_total = $7,
                             version = $8::BIGINT + 1, updated_at = $9
                         WHERE user_id = $1 AND version = $8::BIGINT",
                        &[
                            &next.user_id,
                            &plan,
                            &billing,
                            &status,
                            &next.renew_at,
                            &next.credits_remaining,
                            &next.credits_total,
                            &expected_version,
                            &next.updated_at,
                        ],
                    )
                    .await?
            }
        };
        Ok(changed > 0)
    }

    async fn list_renewal_candidates(&self) -> Result<Vec<CandidateRow>, BillingError> {
        let client = self.pool.pick();
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE plan <> 'free' AND status IN ('active', 'cancelled')
             ORDER BY renew_at NULLS FIRST, user_id"
        );
        let rows = client.query(&sql, &[]).await?;
        rows.iter()
            .map(|row| -> Result<CandidateRow, BillingError> {
                let user_id: String = row.try_get(0)?;
                Ok(match row_to_subscription(row) {
                    Ok(sub) => CandidateRow::Ready(sub),
                    Err(error) => CandidateRow::Unreadable { user_id, error },
                })
            })
            .collect()
    }
}

#[async_trait]
impl CreditJournal for PgStore {
    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CreditTransaction>, BillingError> {
        let client = self.pool.pick();
        let rows = client
            .query(
                "SELECT id, user_id, kind, amount, balance_after, created_at, meta
                 FROM credit_transactions
                 WHERE user_id = $1
                 ORDER BY created_at DESC, seq DESC
                 LIMIT $2 OFFSET $3",
                &[&user_id, &limit, &offset],
            )
            .await?;
        rows.iter().map(row_to_transaction).collect()
    }
}
