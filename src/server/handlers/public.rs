use axum::{Json, extract::State, http::HeaderMap};
use std::sync::Arc;

use crate::error::BillingError;
use crate::server::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Public plan table; a signed-in caller also gets their current plan.
pub async fn list_plans(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, BillingError> {
    let catalog = app_state.ledger.catalog();
    let current = match app_state.auth.current_user(&headers) {
        Some(user) => app_state.ledger.subscription(&user.id).await?.map(|sub| {
            serde_json::json!({
                "plan": sub.plan,
                "billing_type": sub.billing_type,
                "status": sub.status,
            })
        }),
        None => None,
    };
    Ok(Json(serde_json::json!({
        "plans": catalog.offers(),
        "credit_costs": catalog.costs(),
        "current": current,
    })))
}
