use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::balance::{CreditJournal, CreditTransaction, NewCreditTransaction, TransactionKind};
use crate::catalog::{BillingType, PlanKind};
use crate::error::BillingError;
use crate::storage::sqlite::{SqliteStore, invalid_text, time_column};
use crate::storage::time::to_db_string;
use crate::subscription::{CandidateRow, Subscription, SubscriptionStatus, SubscriptionStore};

const SUBSCRIPTION_COLUMNS: &str = "user_id, plan, billing_type, status, renew_at,
    credits_remaining, credits_total, version, created_at, updated_at";

fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscription> {
    let plan_s: String = row.get(1)?;
    let billing_s: String = row.get(2)?;
    let status_s: String = row.get(3)?;
    let renew_at_s: Option<String> = row.get(4)?;
    let created_at_s: String = row.get(8)?;
    let updated_at_s: String = row.get(9)?;
    Ok(Subscription {
        user_id: row.get(0)?,
        plan: PlanKind::parse(&plan_s).ok_or_else(|| invalid_text(1, "plan"))?,
        billing_type: BillingType::parse(&billing_s)
            .ok_or_else(|| invalid_text(2, "billing_type"))?,
        status: SubscriptionStatus::parse(&status_s).ok_or_else(|| invalid_text(3, "status"))?,
        renew_at: renew_at_s.as_deref().map(|s| time_column(4, s)).transpose()?,
        credits_remaining: row.get(5)?,
        credits_total: row.get(6)?,
        version: row.get(7)?,
        created_at: time_column(8, &created_at_s)?,
        updated_at: time_column(9, &updated_at_s)?,
    })
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<CreditTransaction> {
    let kind_s: String = row.get(2)?;
    let created_at_s: String = row.get(5)?;
    Ok(CreditTransaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: TransactionKind::parse(&kind_s).ok_or_else(|| invalid_text(2, "kind"))?,
        amount: row.get(3)?,
        balance_after: row.get(4)?,
        created_at: time_column(5, &created_at_s)?,
        meta: row.get(6)?,
    })
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, BillingError> {
        let conn = self.connection.lock().await;
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = ?1");
        let sub = conn
            .query_row(&sql, [user_id], row_to_subscription)
            .optional()?;
        Ok(sub)
    }

    async fn insert_subscription_if_absent(
        &self,
        initial: &Subscription,
    ) -> Result<Subscription, BillingError> {
        let conn = self.connection.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO subscriptions (user_id, plan, billing_type, status, renew_at,
                credits_remaining, credits_total, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                &initial.user_id,
                initial.plan.as_str(),
                initial.billing_type.as_str(),
                initial.status.as_str(),
                initial.renew_at.as_ref().map(to_db_string),
                initial.credits_remaining,
                initial.credits_total,
                initial.version,
                to_db_string(&initial.created_at),
                to_db_string(&initial.updated_at),
            ],
        )?;
        if inserted > 0 {
            tracing::info!(user_id = %initial.user_id, "provisioned subscription");
        }
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = ?1");
        let stored = conn.query_row(&sql, [&initial.user_id], row_to_subscription)?;
        Ok(stored)
    }

    async fn compare_and_swap(
        &self,
        next: &Subscription,
        expected_version: i64,
        entry: Option<&NewCreditTransaction>,
    ) -> Result<bool, BillingError> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE subscriptions
             SET plan = ?2, billing_type = ?3, status = ?4, renew_at = ?5,
                 credits_remaining = ?6, credits_total = ?7, version = ?8 + 1, updated_at = ?9
             WHERE user_id = ?1 AND version = ?8",
            rusqlite::params![
                &next.user_id,
                next.plan.as_str(),
                next.billing_type.as_str(),
                next.status.as_str(),
                next.renew_at.as_ref().map(to_db_string),
                next.credits_remaining,
                next.credits_total,
                expected_version,
                to_db_string(&next.updated_at),
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        if let Some(entry) = entry {
            tx.execute(
                "INSERT INTO credit_transactions (id, user_id, kind, amount, balance_after, created_at, meta)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    &next.user_id,
                    entry.kind.as_str(),
                    entry.amount,
                    entry.balance_after,
                    to_db_string(&Utc::now()),
                    entry.meta.clone(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    async fn list_renewal_candidates(&self) -> Result<Vec<CandidateRow>, BillingError> {
        let conn = self.connection.lock().await;
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE plan != 'free' AND status IN ('active', 'cancelled')
             ORDER BY renew_at, user_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let user_id: String = row.get(0)?;
            Ok(match row_to_subscription(row) {
                Ok(sub) => CandidateRow::Ready(sub),
                Err(e) => CandidateRow::Unreadable {
                    user_id,
                    error: e.into(),
                },
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

#[async_trait]
impl CreditJournal for SqliteStore {
    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CreditTransaction>, BillingError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, kind, amount, balance_after, created_at, meta
             FROM credit_transactions
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![user_id, limit, offset],
            row_to_transaction,
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SqliteStore::new(db_path.to_str().unwrap()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn insert_if_absent_keeps_first_writer() {
        let (_dir, db) = store().await;
        let now = Utc::now();
        let first = db
            .insert_subscription_if_absent(&Subscription::new_free("u1", 30, now))
            .await
            .unwrap();
        assert_eq!(first.credits_remaining, 30);

        let second = db
            .insert_subscription_if_absent(&Subscription::new_free("u1", 999, now))
            .await
            .unwrap();
        assert_eq!(second.credits_remaining, 30);
        assert_eq!(second.version, 1);
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_version() {
        let (_dir, db) = store().await;
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let sub = db
            .insert_subscription_if_absent(&Subscription::new_free("u1", 30, now))
            .await
            .unwrap();

        let mut next = sub.clone();
        next.plan = PlanKind::Premium;
        next.renew_at = Some(now + Duration::days(31));
        next.credits_remaining = 300;
        next.credits_total = 300;
        let entry = NewCreditTransaction {
            kind: TransactionKind::PlanChange,
            amount: 270,
            balance_after: 300,
            meta: None,
        };
        assert!(db.compare_and_swap(&next, sub.version, Some(&entry)).await.unwrap());
        // Same expected version again: the row has moved on.
        assert!(!db.compare_and_swap(&next, sub.version, Some(&entry)).await.unwrap());

        let stored = db.get_subscription("u1").await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.plan, PlanKind::Premium);
        assert_eq!(stored.renew_at, Some(now + Duration::days(31)));

        let txs = db.list_transactions("u1", 10, 0).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].kind, TransactionKind::PlanChange);
        assert_eq!(txs[0].balance_after, 300);
    }

    #[tokio::test]
    async fn negative_balance_is_refused_by_schema() {
        let (_dir, db) = store().await;
        let sub = db
            .insert_subscription_if_absent(&Subscription::new_free("u1", 30, Utc::now()))
            .await
            .unwrap();
        let mut next = sub.clone();
        next.credits_remaining = -1;
        let res = db.compare_and_swap(&next, sub.version, None).await;
        assert!(matches!(res, Err(BillingError::Db(_))));
        let stored = db.get_subscription("u1").await.unwrap().unwrap();
        assert_eq!(stored.credits_remaining, 30);
    }

    #[tokio::test]
    async fn renewal_candidates_exclude_free_and_terminal_rows() {
        let (_dir, db) = store().await;
        let now = Utc::now();
        for (user, plan, status) in [
            ("free", PlanKind::Free, SubscriptionStatus::Active),
            ("paid", PlanKind::Premium, SubscriptionStatus::Active),
            ("leaving", PlanKind::Business, SubscriptionStatus::Cancelled),
            ("lapsed", PlanKind::Premium, SubscriptionStatus::Expired),
        ] {
            let sub = db
                .insert_subscription_if_absent(&Subscription::new_free(user, 30, now))
                .await
                .unwrap();
            let mut next = sub.clone();
            next.plan = plan;
            next.status = status;
            assert!(db.compare_and_swap(&next, sub.version, None).await.unwrap());
        }
        let mut users: Vec<String> = db
            .list_renewal_candidates()
            .await
            .unwrap()
            .iter()
            .map(|c| c.user_id().to_string())
            .collect();
        users.sort();
        assert_eq!(users, vec!["leaving".to_string(), "paid".to_string()]);
    }

    #[tokio::test]
    async fn unreadable_candidate_does_not_hide_the_others() {
        let (_dir, db) = store().await;
        let now = Utc::now();
        for user in ["good", "odd"] {
            let sub = db
                .insert_subscription_if_absent(&Subscription::new_free(user, 30, now))
                .await
                .unwrap();
            let mut next = sub.clone();
            next.plan = PlanKind::Premium;
            assert!(db.compare_and_swap(&next, sub.version, None).await.unwrap());
        }
        db.connection
            .lock()
            .await
            .execute("UPDATE subscriptions SET plan = 'enterprise' WHERE user_id = 'odd'", [])
            .unwrap();

        let rows = db.list_renewal_candidates().await.unwrap();
        assert_eq!(rows.len(), 2);
        for row in rows {
            match row {
                CandidateRow::Ready(sub) => assert_eq!(sub.user_id, "good"),
                CandidateRow::Unreadable { user_id, .. } => assert_eq!(user_id, "odd"),
            }
        }
    }
}
