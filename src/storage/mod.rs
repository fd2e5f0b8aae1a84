pub mod postgres;
mod postgres_payments;
mod postgres_subscriptions;
pub mod sqlite;
mod sqlite_payments;
mod sqlite_subscriptions;
pub mod time;

use std::sync::Arc;

use crate::balance::CreditJournal;
use crate::config::StorageConfig;
use crate::error::Result as AppResult;
use crate::payment::PaymentStore;
use crate::subscription::SubscriptionStore;

pub use postgres::PgStore;
pub use sqlite::SqliteStore;

/// The three store seams, backed by the same database.
#[derive(Clone)]
pub struct Stores {
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub payments: Arc<dyn PaymentStore>,
    pub journal: Arc<dyn CreditJournal>,
}

impl Stores {
    pub fn from_sqlite(store: SqliteStore) -> Self {
        let store = Arc::new(store);
        Self {
            subscriptions: store.clone(),
            payments: store.clone(),
            journal: store,
        }
    }

    pub fn from_postgres(store: PgStore) -> Self {
        let store = Arc::new(store);
        Self {
            subscriptions: store.clone(),
            payments: store.clone(),
            journal: store,
        }
    }
}

/// Postgres when a URL is configured (no SQLite fallback), SQLite otherwise.
pub async fn open_stores(config: &StorageConfig) -> AppResult<Stores> {
    if let Some(pg_url) = &config.pg_url {
        let pool_size = config.pg_pool_size.unwrap_or(4);
        let pg = PgStore::connect(pg_url, &config.pg_schema, pool_size).await?;
        tracing::info!("Using PostgreSQL for billing data");
        Ok(Stores::from_postgres(pg))
    } else {
        let sqlite = SqliteStore::new(&config.database_path).await?;
        tracing::info!("Using SQLite for billing data");
        Ok(Stores::from_sqlite(sqlite))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn opens_sqlite_without_pg_url() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            database_path: dir.path().join("b.db").to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        let stores = open_stores(&config).await.unwrap();
        assert!(stores.subscriptions.get_subscription("nobody").await.unwrap().is_none());
        assert!(stores.journal.list_transactions("nobody", 10, 0).await.unwrap().is_empty());
    }
}
