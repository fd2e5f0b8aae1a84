use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::catalog::{BillingType, PlanKind};
use crate::checkout::PixCharge;
use crate::error::BillingError;
use crate::payment::Payment;
use crate::server::AppState;
use crate::storage::time::to_iso8601_utc_string;

#[derive(Debug, Deserialize)]
pub struct CreatePixRequest {
    pub plan: String,
    #[serde(default)]
    pub billing_type: Option<String>,
}

pub async fn create_pix(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreatePixRequest>,
) -> Result<Json<PixCharge>, BillingError> {
    let user = app_state.auth.require_user(&headers)?;
    let plan = PlanKind::parse(&payload.plan)
        .ok_or_else(|| BillingError::BadRequest(format!("unknown plan `{}`", payload.plan)))?;
    let billing = match payload.billing_type.as_deref() {
        None => BillingType::Monthly,
        Some(raw) => BillingType::parse(raw)
            .ok_or_else(|| BillingError::BadRequest(format!("unknown billing type `{raw}`")))?,
    };
    let charge = app_state
        .checkout
        .create_pix_charge(&user.id, user.email.as_deref(), plan, billing, Utc::now())
        .await?;
    Ok(Json(charge))
}

pub async fn payment_status(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
) -> Result<Json<serde_json::Value>, BillingError> {
    let user = app_state.auth.require_user(&headers)?;
    let payment = app_state
        .checkout
        .refresh_payment(&user.id, &payment_id, Utc::now())
        .await?;
    Ok(Json(payment_json(&payment)))
}

#[derive(Debug, Deserialize)]
pub struct PaymentsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_payments(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<PaymentsQuery>,
) -> Result<Json<serde_json::Value>, BillingError> {
    let user = app_state.auth.require_user(&headers)?;
    let items = app_state
        .checkout
        .payment_history(&user.id, q.limit.unwrap_or(20))
        .await?
        .iter()
        .map(payment_json)
        .collect::<Vec<_>>();
    Ok(Json(serde_json::json!({ "items": items })))
}

fn payment_json(payment: &Payment) -> serde_json::Value {
    serde_json::json!({
        "payment_id": payment.id,
        "plan": payment.plan,
        "amount_cents": payment.amount_cents,
        "status": payment.status,
        "created_at": to_iso8601_utc_string(&payment.created_at),
    })
}
