use axum::{Json, extract::State, http::HeaderMap};
use chrono::Utc;
use std::sync::Arc;

use crate::auth::require_service_secret;
use crate::error::BillingError;
use crate::reconciler::SweepReport;
use crate::server::AppState;

pub async fn run_renewal(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, BillingError> {
    require_service_secret(&headers, app_state.config.auth.cron_secret.as_deref())?;
    let report = app_state.reconciler.run_sweep(Utc::now()).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use crate::catalog::{BillingType, PlanKind};
    use crate::server::test_support::{CRON_SECRET, TestApp, json_body, request};
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn rejects_missing_or_wrong_secret_before_sweeping() {
        let t = TestApp::new().await;
        t.state
            .ledger
            .upgrade_plan("u1", PlanKind::Premium, BillingType::Monthly)
            .await
            .unwrap();
        let before = t.state.ledger.subscription("u1").await.unwrap().unwrap();

        let user_token = t.user_token("u1");
        for token in [None, Some("wrong"), Some(user_token.as_str())] {
            let resp = t
                .app
                .clone()
                .oneshot(request("POST", "/cron/renewal", token, None))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
        let after = t.state.ledger.subscription("u1").await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn authorized_trigger_returns_report() {
        let t = TestApp::new().await;
        t.state
            .ledger
            .upgrade_plan("u1", PlanKind::Premium, BillingType::Monthly)
            .await
            .unwrap();
        let resp = t
            .app
            .oneshot(request("GET", "/api/cron/renewal", Some(CRON_SECRET), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["checked"], 1);
        assert_eq!(body["skipped"], 1);
        assert!(body["errors"].as_array().unwrap().is_empty());
    }
}
