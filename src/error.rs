use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("subscription not found for user {0}")]
    SubscriptionNotFound(String),

    #[error("payment lookup failed: {0}")]
    PaymentLookup(String),

    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("Postgres error: {0}")]
    Postgres(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Time parse error: {0}")]
    TimeParse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl From<tokio_postgres::Error> for BillingError {
    fn from(e: tokio_postgres::Error) -> Self {
        BillingError::Postgres(e.to_string())
    }
}

impl BillingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            BillingError::SubscriptionNotFound(_) | BillingError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            BillingError::Conflict(_) => StatusCode::CONFLICT,
            BillingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BillingError::BadRequest(_) | BillingError::Json(_) => StatusCode::BAD_REQUEST,
            BillingError::ConfigurationMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::Http(_) | BillingError::Gateway(_) | BillingError::PaymentLookup(_) => {
                StatusCode::BAD_GATEWAY
            }
            BillingError::Db(_)
            | BillingError::Postgres(_)
            | BillingError::Io(_)
            | BillingError::TimeParse(_)
            | BillingError::Config(_)
            | BillingError::Token(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::error!(status = code.as_u16(), "request failed: {}", self);
        }
        (code, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;
