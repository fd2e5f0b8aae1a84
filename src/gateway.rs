use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use crate::config::GatewayConfig;
use crate::error::{BillingError, Result};
use crate::payment::PaymentStatus;

/// Gateway-side payment state, already mapped onto the local statuses.
pub type ChargeStatus = PaymentStatus;

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub customer: String,
    pub amount_cents: i64,
    pub due_date: NaiveDate,
    pub description: String,
    pub external_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub charge_id: String,
    /// PIX copy-and-paste code.
    pub pix_payload: Option<String>,
    /// Base64 PNG of the QR code.
    pub qr_image: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, req: &ChargeRequest) -> Result<Charge>;

    async fn charge_status(&self, charge_id: &str) -> Result<ChargeStatus>;
}

pub fn map_asaas_status(status: &str) -> ChargeStatus {
    match status {
        "RECEIVED" | "CONFIRMED" | "RECEIVED_IN_CASH" => PaymentStatus::Approved,
        "OVERDUE" | "REFUNDED" | "REFUND_REQUESTED" | "CHARGEBACK_REQUESTED" | "DELETED" => {
            PaymentStatus::Failed
        }
        _ => PaymentStatus::Pending,
    }
}

#[derive(Deserialize)]
struct AsaasPayment {
    id: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AsaasPixQrCode {
    payload: Option<String>,
    encoded_image: Option<String>,
}

#[derive(Deserialize)]
struct AsaasErrors {
    #[serde(default)]
    errors: Vec<AsaasErrorItem>,
}

#[derive(Deserialize)]
struct AsaasErrorItem {
    description: Option<String>,
}

/// PIX charges through the Asaas REST API.
pub struct AsaasGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AsaasGateway {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// `None` when the base URL or API key is not configured.
    pub fn from_config(config: &GatewayConfig) -> Result<Option<Self>> {
        let base_url = config.base_url.as_deref().map(str::trim).unwrap_or("");
        let api_key = config.api_key.as_deref().map(str::trim).unwrap_or("");
        if base_url.is_empty() || api_key.is_empty() {
            return Ok(None);
        }
        Self::new(base_url, api_key, Duration::from_secs(config.timeout_secs)).map(Some)
    }

    async fn error_from(resp: reqwest::Response) -> BillingError {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let description = serde_json::from_str::<AsaasErrors>(&text)
            .ok()
            .and_then(|e| e.errors.into_iter().find_map(|i| i.description))
            .unwrap_or(text);
        BillingError::Gateway(format!("{}: {}", status.as_u16(), description))
    }
}

#[async_trait]
impl PaymentGateway for AsaasGateway {
    async fn create_charge(&self, req: &ChargeRequest) -> Result<Charge> {
        let body = json!({
            "customer": req.customer,
            "billingType": "PIX",
            "value": req.amount_cents as f64 / 100.0,
            "dueDate": req.due_date.format("%Y-%m-%d").to_string(),
            "description": req.description,
            "externalReference": req.external_reference,
        });
        let resp = self
            .client
            .post(format!("{}/payments", self.base_url))
            .header("access_token", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let created: AsaasPayment = resp.json().await?;
        let charge_id = created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BillingError::Gateway("charge created without id".into()))?;

        // The QR code is best effort; the charge already exists.
        let qr = self
            .client
            .get(format!("{}/payments/{}/pixQrCode", self.base_url, charge_id))
            .header("access_token", &self.api_key)
            .send()
            .await;
        let (pix_payload, qr_image) = match qr {
            Ok(r) if r.status().is_success() => match r.json::<AsaasPixQrCode>().await {
                Ok(q) => (q.payload, q.encoded_image),
                Err(e) => {
                    tracing::warn!(charge_id = %charge_id, "unreadable pix qr code: {}", e);
                    (None, None)
                }
            },
            Ok(r) => {
                tracing::warn!(charge_id = %charge_id, status = r.status().as_u16(), "pix qr code unavailable");
                (None, None)
            }
            Err(e) => {
                tracing::warn!(charge_id = %charge_id, "pix qr code request failed: {}", e);
                (None, None)
            }
        };

        Ok(Charge {
            charge_id,
            pix_payload: pix_payload.filter(|s| !s.is_empty()),
            qr_image: qr_image.filter(|s| !s.is_empty()),
        })
    }

    async fn charge_status(&self, charge_id: &str) -> Result<ChargeStatus> {
        let resp = self
            .client
            .get(format!("{}/payments/{}", self.base_url, charge_id))
            .header("access_token", &self.api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let payment: AsaasPayment = resp.json().await?;
        Ok(map_asaas_status(payment.status.as_deref().unwrap_or("")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;

    async fn create(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        if headers.get("access_token").and_then(|v| v.to_str().ok()) != Some("secret") {
            return (StatusCode::UNAUTHORIZED, Json(json!({"errors": [{"description": "bad key"}]})));
        }
        if body["customer"].as_str().unwrap_or("").is_empty() {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"errors": [{"description": "customer required"}]})),
            );
        }
        assert_eq!(body["billingType"], "PIX");
        assert_eq!(body["value"], 97.0);
        (StatusCode::OK, Json(json!({"id": "pay_1", "status": "PENDING"})))
    }

    async fn qr(Path(id): Path<String>) -> Json<Value> {
        Json(json!({"payload": format!("pix-{id}"), "encodedImage": "iVBOR"}))
    }

    async fn status(Path(id): Path<String>) -> Json<Value> {
        let s = match id.as_str() {
            "pay_1" => "RECEIVED",
            "pay_2" => "OVERDUE",
            _ => "PENDING",
        };
        Json(json!({"id": id, "status": s}))
    }

    async fn stub() -> String {
        let app = Router::new()
            .route("/payments", post(create))
            .route("/payments/{id}/pixQrCode", get(qr))
            .route("/payments/{id}", get(status));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request(customer: &str) -> ChargeRequest {
        ChargeRequest {
            customer: customer.into(),
            amount_cents: 9_700,
            due_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            description: "Plano Premium - monthly".into(),
            external_reference: "u1".into(),
        }
    }

    #[tokio::test]
    async fn creates_charge_with_pix_code() {
        let base = stub().await;
        let gw = AsaasGateway::new(&base, "secret", Duration::from_secs(5)).unwrap();
        let charge = gw.create_charge(&request("a@b.c")).await.unwrap();
        assert_eq!(charge.charge_id, "pay_1");
        assert_eq!(charge.pix_payload.as_deref(), Some("pix-pay_1"));
        assert_eq!(charge.qr_image.as_deref(), Some("iVBOR"));
    }

    #[tokio::test]
    async fn surfaces_gateway_error_description() {
        let base = stub().await;
        let gw = AsaasGateway::new(&base, "secret", Duration::from_secs(5)).unwrap();
        let err = gw.create_charge(&request("")).await.unwrap_err();
        match err {
            BillingError::Gateway(msg) => assert!(msg.contains("customer required")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn maps_remote_statuses() {
        let base = stub().await;
        let gw = AsaasGateway::new(&base, "secret", Duration::from_secs(5)).unwrap();
        assert_eq!(gw.charge_status("pay_1").await.unwrap(), PaymentStatus::Approved);
        assert_eq!(gw.charge_status("pay_2").await.unwrap(), PaymentStatus::Failed);
        assert_eq!(gw.charge_status("pay_3").await.unwrap(), PaymentStatus::Pending);
    }

    #[test]
    fn missing_config_disables_gateway() {
        let cfg = GatewayConfig {
            base_url: Some("https://sandbox.asaas.com/api/v3".into()),
            api_key: Some("  ".into()),
            ..GatewayConfig::default()
        };
        assert!(AsaasGateway::from_config(&cfg).unwrap().is_none());
        assert_eq!(map_asaas_status("CONFIRMED"), PaymentStatus::Approved);
        assert_eq!(map_asaas_status("CHARGEBACK_REQUESTED"), PaymentStatus::Failed);
        assert_eq!(map_asaas_status("AWAITING_RISK_ANALYSIS"), PaymentStatus::Pending);
    }
}
