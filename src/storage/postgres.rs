use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use tokio_postgres::{Client, NoTls};

use crate::error::BillingError;

// Keepalive pings are jittered so pooled clients do not fire together.
pub fn spawn_keepalive(client: Arc<Client>, min_secs: u64, max_secs: u64) {
    let max_secs = max_secs.max(min_secs + 1);
    tokio::spawn(async move {
        loop {
            let jitter = rand::rng().random_range(min_secs..=max_secs);
            tokio::time::sleep(std::time::Duration::from_secs(jitter)).await;
            let c = Arc::clone(&client);
            if let Ok(Err(e)) = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                c.execute("SELECT 1", &[]),
            )
            .await
            {
                tracing::debug!("postgres keepalive failed: {}", e);
            }
        }
    });
}

/// Double-quotes a SQL identifier, doubling embedded quotes.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub struct PgPool {
    clients: Vec<Arc<Client>>,
    next: AtomicUsize,
}

impl PgPool {
    async fn connect_one(pg_url: &str, schema: Option<&str>) -> Result<Client, BillingError> {
        let (client, connection) = tokio_postgres::connect(pg_url, NoTls)
            .await
            .map_err(|e| BillingError::Config(format!("postgres connect failed: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("postgres connection closed: {}", e);
            }
        });
        if let Some(schema) = schema {
            client
                .batch_execute(&format!("SET search_path TO {}", quote_ident(schema)))
                .await
                .map_err(|e| BillingError::Config(format!("search_path {schema}: {e}")))?;
        }
        Ok(client)
    }

    async fn connect_many(
        pg_url: &str,
        schema: Option<&str>,
        size: usize,
    ) -> Result<Self, BillingError> {
        let size = size.max(1);
        let mut clients = Vec::with_capacity(size);
        while clients.len() < size {
            let client = Arc::new(Self::connect_one(pg_url, schema).await?);
            spawn_keepalive(Arc::clone(&client), 240, 420);
            clients.push(client);
        }
        tracing::debug!(size, "postgres pool ready");
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    pub fn pick(&self) -> Arc<Client> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len().max(1);
        Arc::clone(&self.clients[idx])
    }
}

/// Postgres-backed store; same tables as the SQLite one with native
/// timestamp columns.
#[derive(Clone)]
pub struct PgStore {
    pub pool: Arc<PgPool>,
}

impl PgStore {
    pub async fn connect(
        pg_url: &str,
        schema: &Option<String>,
        pool_size: usize,
    ) -> Result<Self, BillingError> {
        let schema = schema.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let pool = PgPool::connect_many(pg_url, schema, pool_size).await?;
        let store = Self {
            pool: Arc::new(pool),
        };
        let client = store.pool.pick();
        client
            .batch_execute(
                r#"CREATE TABLE IF NOT EXISTS subscriptions (
                    user_id TEXT PRIMARY KEY,
                    plan TEXT NOT NULL,
                    billing_type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    renew_at TIMESTAMPTZ,
                    credits_remaining BIGINT NOT NULL CHECK (credits_remaining >= 0),
                    credits_total BIGINT NOT NULL,
                    version BIGINT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_subscriptions_status_plan
                    ON subscriptions (status, plan);

                CREATE TABLE IF NOT EXISTS payments (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    charge_id TEXT UNIQUE,
                    plan TEXT NOT NULL,
                    amount_cents BIGINT NOT NULL,
                    status TEXT NOT NULL,
                    pix_payload TEXT,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_payments_user_status_created
                    ON payments (user_id, status, created_at);

                CREATE TABLE IF NOT EXISTS credit_transactions (
                    seq BIGSERIAL PRIMARY KEY,
                    id TEXT NOT NULL UNIQUE,
                    user_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    amount BIGINT NOT NULL,
                    balance_after BIGINT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    meta TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_credit_transactions_user_created
                    ON credit_transactions (user_id, created_at);"#,
            )
            .await
            .map_err(|e| BillingError::Config(format!("Failed to init postgres schema: {}", e)))?;
        tracing::info!("Postgres store initialized");
        Ok(store)
    }
}

pub(crate) fn invalid_column(name: &str, raw: &str) -> BillingError {
    BillingError::Postgres(format!("invalid {name} value: {raw}"))
}
