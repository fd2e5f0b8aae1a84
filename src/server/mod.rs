pub mod handlers;

use axum::Router;
use std::sync::Arc;

use crate::auth::AuthVerifier;
use crate::catalog::PlanCatalog;
use crate::checkout::Checkout;
use crate::config::Settings;
use crate::correlator::PaymentCorrelator;
use crate::error::Result as AppResult;
use crate::gateway::{AsaasGateway, PaymentGateway};
use crate::ledger::CreditLedger;
use crate::reconciler::RenewalReconciler;
use crate::storage::time::billing_offset;
use crate::storage::{Stores, open_stores};

#[derive(Clone)]
pub struct AppState {
    pub config: Settings,
    pub auth: AuthVerifier,
    pub ledger: CreditLedger,
    pub checkout: Checkout,
    pub reconciler: RenewalReconciler,
}

impl AppState {
    /// Opens the configured stores and gateway and wires the services.
    pub async fn build(config: Settings) -> AppResult<Self> {
        let stores = open_stores(&config.storage).await?;
        let gateway = match AsaasGateway::from_config(&config.gateway)? {
            Some(gw) => {
                tracing::info!("Payment gateway configured");
                Some(Arc::new(gw) as Arc<dyn PaymentGateway>)
            }
            None => {
                tracing::warn!("Payment gateway not configured; checkout is disabled");
                None
            }
        };
        Ok(Self::from_parts(config, stores, gateway))
    }

    pub fn from_parts(
        config: Settings,
        stores: Stores,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let offset = billing_offset(config.billing.utc_offset_hours);
        let catalog = Arc::new(PlanCatalog::new(&config.plans, config.credit_costs));
        let ledger = CreditLedger::new(&stores, catalog, offset);
        let correlator = PaymentCorrelator::new(stores.payments.clone(), offset);
        let reconciler = RenewalReconciler::new(
            stores.subscriptions.clone(),
            ledger.clone(),
            correlator,
            config.billing.sweep_concurrency,
        );
        let checkout = Checkout::new(stores.payments.clone(), ledger.clone(), gateway);
        if config.auth.jwt_secret.is_none() {
            tracing::warn!("auth.jwt_secret not set; user routes will reject every request");
        }
        if config.auth.cron_secret.is_none() {
            tracing::warn!("auth.cron_secret not set; renewal and operator routes are disabled");
        }
        Self {
            auth: AuthVerifier::new(config.auth.jwt_secret.as_deref()),
            config,
            ledger,
            checkout,
            reconciler,
        }
    }
}

pub fn create_app(app_state: Arc<AppState>) -> Router {
    let routes = handlers::routes();
    let mut app = Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .with_state(app_state);

    use axum::http::{Method, header};
    use tower_http::cors::{AllowOrigin, CorsLayer};
    use tower_http::trace::TraceLayer;
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true);
    app = app.layer(cors).layer(TraceLayer::new_for_http());

    app
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auth::AccessTokenClaims;
    use crate::config::AuthConfig;
    use crate::storage::SqliteStore;
    use axum::body::Body;
    use axum::http::{Request, header::AUTHORIZATION};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    pub const JWT_SECRET: &str = "testsecret";
    pub const CRON_SECRET: &str = "cronsecret";

    pub struct TestApp {
        _dir: TempDir,
        pub stores: Stores,
        pub state: Arc<AppState>,
        pub app: Router,
    }

    impl TestApp {
        pub async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db_path = dir.path().join("test.db");
            let mut config = Settings {
                auth: AuthConfig {
                    jwt_secret: Some(JWT_SECRET.into()),
                    cron_secret: Some(CRON_SECRET.into()),
                },
                ..Settings::default()
            };
            config.billing.utc_offset_hours = 0;
            let store = SqliteStore::new(db_path.to_str().unwrap()).await.unwrap();
            let stores = Stores::from_sqlite(store);
            let state = Arc::new(AppState::from_parts(config, stores.clone(), None));
            let app = create_app(state.clone());
            Self {
                _dir: dir,
                stores,
                state,
                app,
            }
        }

        pub fn user_token(&self, user_id: &str) -> String {
            self.state
                .auth
                .sign(&AccessTokenClaims {
                    sub: user_id.into(),
                    email: Some(format!("{user_id}@example.com")),
                    exp: (Utc::now() + Duration::hours(1)).timestamp(),
                    iat: None,
                })
                .unwrap()
        }
    }

    pub fn request(method: &str, uri: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {t}"));
        }
        match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    pub async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
