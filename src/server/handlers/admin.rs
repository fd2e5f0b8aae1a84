use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::require_service_secret;
use crate::catalog::{BillingType, PlanKind};
use crate::error::BillingError;
use crate::server::AppState;
use crate::storage::time::to_iso8601_utc_string;

#[derive(Debug, Deserialize)]
pub struct SetPlanRequest {
    pub plan: String,
    #[serde(default)]
    pub billing_type: Option<String>,
}

pub async fn set_user_plan(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(payload): Json<SetPlanRequest>,
) -> Result<Json<serde_json::Value>, BillingError> {
    require_service_secret(&headers, app_state.config.auth.cron_secret.as_deref())?;
    let plan = PlanKind::parse(&payload.plan)
        .ok_or_else(|| BillingError::BadRequest(format!("unknown plan `{}`", payload.plan)))?;
    let billing = payload
        .billing_type
        .as_deref()
        .map(|raw| {
            BillingType::parse(raw)
                .ok_or_else(|| BillingError::BadRequest(format!("unknown billing type `{raw}`")))
        })
        .transpose()?
        .unwrap_or_default();
    let sub = app_state.ledger.upgrade_plan(&user_id, plan, billing).await?;
    tracing::info!(user_id = %user_id, plan = plan.as_str(), "plan set by operator");
    Ok(Json(serde_json::json!({
        "user_id": sub.user_id,
        "plan": sub.plan,
        "billing_type": sub.billing_type,
        "status": sub.status,
        "renew_at": sub.renew_at.as_ref().map(to_iso8601_utc_string),
        "credits": sub.balance(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn grant_credits(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(payload): Json<GrantCreditsRequest>,
) -> Result<Json<serde_json::Value>, BillingError> {
    require_service_secret(&headers, app_state.config.auth.cron_secret.as_deref())?;
    let balance = app_state
        .ledger
        .add(&user_id, payload.amount, payload.reason.as_deref())
        .await?;
    Ok(Json(serde_json::json!({
        "user_id": user_id,
        "balance": balance,
    })))
}
