use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::catalog::CreditAction;
use crate::error::BillingError;
use crate::server::AppState;
use crate::storage::time::to_iso8601_utc_string;

pub async fn ensure_account(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, BillingError> {
    let user = app_state.auth.require_user(&headers)?;
    let sub = app_state.ledger.ensure_account(&user.id).await?;
    Ok(Json(serde_json::json!({
        "user_id": sub.user_id,
        "plan": sub.plan,
        "status": sub.status,
        "credits": sub.balance(),
    })))
}

pub async fn get_balance(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, BillingError> {
    let user = app_state.auth.require_user(&headers)?;
    let sub = app_state.ledger.subscription(&user.id).await?;
    let balance = app_state.ledger.get_balance(&user.id).await?;
    Ok(Json(serde_json::json!({
        "balance": balance,
        "credits": sub.map(|s| s.balance()),
    })))
}

pub async fn get_subscription(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, BillingError> {
    let user = app_state.auth.require_user(&headers)?;
    let view = app_state.ledger.status(&user.id).await?;
    Ok(Json(serde_json::json!({
        "plan": view.plan,
        "plan_name": view.plan_name,
        "billing_type": view.billing_type,
        "price_cents": view.price_cents,
        "status": view.status,
        "renew_at": view.renew_at.as_ref().map(to_iso8601_utc_string),
        "credits": view.credits,
    })))
}

pub async fn cancel_subscription(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, BillingError> {
    let user = app_state.auth.require_user(&headers)?;
    let sub = app_state.ledger.cancel(&user.id, Utc::now()).await?;
    tracing::info!(user_id = %user.id, plan = sub.plan.as_str(), "subscription cancelled");
    Ok(Json(serde_json::json!({
        "status": sub.status,
        "plan": sub.plan,
        "renew_at": sub.renew_at.as_ref().map(to_iso8601_utc_string),
    })))
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

pub async fn list_transactions(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<TransactionsQuery>,
) -> Result<Json<serde_json::Value>, BillingError> {
    let user = app_state.auth.require_user(&headers)?;
    let limit = q.limit.unwrap_or(20).clamp(1, 200);
    let offset = q.offset.unwrap_or(0).max(0);

    let items = app_state
        .ledger
        .transactions(&user.id, limit, offset)
        .await?
        .into_iter()
        .map(|t| {
            serde_json::json!({
                "id": t.id,
                "kind": t.kind.as_str(),
                "amount": t.amount,
                "balance_after": t.balance_after,
                "created_at": to_iso8601_utc_string(&t.created_at),
                "meta": t.meta,
            })
        })
        .collect::<Vec<_>>();

    Ok(Json(serde_json::json!({
        "limit": limit,
        "offset": offset,
        "items": items,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SpendRequest {
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub action: Option<CreditAction>,
}

pub async fn spend_credits(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<SpendRequest>,
) -> Result<Response, BillingError> {
    let user = app_state.auth.require_user(&headers)?;
    let result = match (payload.action, payload.amount) {
        (Some(action), _) => app_state.ledger.spend_action(&user.id, action).await?,
        (None, Some(amount)) => app_state.ledger.spend_credits(&user.id, amount).await?,
        (None, None) => {
            return Err(BillingError::BadRequest("amount or action is required".into()));
        }
    };
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::PAYMENT_REQUIRED
    };
    Ok((status, Json(result)).into_response())
}

#[cfg(test)]
mod tests {
    use crate::server::test_support::{TestApp, json_body, request};
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn user_routes_require_a_valid_token() {
        let t = TestApp::new().await;
        let resp = t.app.clone().oneshot(request("GET", "/me/balance", None, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = t
            .app
            .oneshot(request("GET", "/me/balance", Some("not.a.jwt"), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signup_then_spend_until_payment_required() {
        let t = TestApp::new().await;
        let token = t.user_token("u1");

        let resp = t
            .app
            .clone()
            .oneshot(request("GET", "/me/balance", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["balance"], 0);

        let resp = t
            .app
            .clone()
            .oneshot(request("POST", "/me/account", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["credits"]["available_credits"], 30);

        let resp = t
            .app
            .clone()
            .oneshot(request(
                "POST",
                "/me/credits/spend",
                Some(&token),
                Some(json!({"action": "summary_advanced"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["remaining_credits"], 5);

        let resp = t
            .app
            .clone()
            .oneshot(request(
                "POST",
                "/api/me/credits/spend",
                Some(&token),
                Some(json!({"amount": 6})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
        let body = json_body(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["remaining_credits"], 5);
        assert!(body["error"].as_str().unwrap().contains("insufficient"));

        let resp = t
            .app
            .oneshot(request("GET", "/me/transactions", Some(&token), None))
            .await
            .unwrap();
        let body = json_body(resp).await;
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["kind"], "spend");
        assert_eq!(items[0]["amount"], -25);
    }

    #[tokio::test]
    async fn spend_without_amount_or_action_is_rejected() {
        let t = TestApp::new().await;
        let token = t.user_token("u1");
        let resp = t
            .app
            .oneshot(request("POST", "/me/credits/spend", Some(&token), Some(json!({}))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn subscription_view_and_cancel() {
        let t = TestApp::new().await;
        let token = t.user_token("u1");
        let resp = t
            .app
            .clone()
            .oneshot(request("GET", "/me/subscription", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        t.state
            .ledger
            .upgrade_plan("u1", crate::catalog::PlanKind::Premium, crate::catalog::BillingType::Monthly)
            .await
            .unwrap();
        let resp = t
            .app
            .clone()
            .oneshot(request("GET", "/me/subscription", Some(&token), None))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["plan"], "premium");
        assert_eq!(body["price_cents"], 9_700);
        assert_eq!(body["credits"]["available_credits"], 300);

        let resp = t
            .app
            .clone()
            .oneshot(request("POST", "/me/subscription/cancel", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "cancelled");

        let resp = t
            .app
            .oneshot(request("POST", "/me/subscription/cancel", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
