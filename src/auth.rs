use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{BillingError, Result};

/// Claims of the auth provider's access tokens that billing cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    pub email: Option<String>,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// Short, non-reversible tag for logs.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

/// Verifies HS256 access tokens.
#[derive(Clone)]
pub struct AuthVerifier {
    secret: Option<Vec<u8>>,
    validation: Validation,
}

impl AuthVerifier {
    pub fn new(secret: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            secret: secret
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
            validation,
        }
    }

    fn secret(&self) -> Result<&[u8]> {
        self.secret
            .as_deref()
            .ok_or_else(|| BillingError::ConfigurationMissing("auth.jwt_secret".into()))
    }

    pub fn sign(&self, claims: &AccessTokenClaims) -> Result<String> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.secret()?),
        )
        .map_err(BillingError::from)
    }

    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims> {
        let data = decode::<AccessTokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret()?),
            &self.validation,
        )
        .map_err(|e| BillingError::Unauthorized(format!("invalid token: {e}")))?;
        if data.claims.sub.trim().is_empty() {
            return Err(BillingError::Unauthorized("invalid token: subject".into()));
        }
        Ok(data.claims)
    }

    /// Identity from the bearer token, if any and valid.
    pub fn current_user(&self, headers: &HeaderMap) -> Option<CurrentUser> {
        self.require_user(headers).ok()
    }

    pub fn require_user(&self, headers: &HeaderMap) -> Result<CurrentUser> {
        let token = bearer_token(headers)
            .ok_or_else(|| BillingError::Unauthorized("missing bearer token".into()))?;
        match self.verify(token) {
            Ok(claims) => Ok(CurrentUser {
                id: claims.sub,
                email: claims.email,
            }),
            Err(e) => {
                tracing::debug!(token = %token_fingerprint(token), "rejected access token: {}", e);
                Err(e)
            }
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let (da, db) = (Sha256::digest(a), Sha256::digest(b));
    da.iter().zip(db.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Bearer check for the renewal trigger and operator routes. An unset
/// secret rejects every call.
pub fn require_service_secret(headers: &HeaderMap, secret: Option<&str>) -> Result<()> {
    let Some(expected) = secret.map(str::trim).filter(|s| !s.is_empty()) else {
        tracing::warn!("service call rejected: cron secret not configured");
        return Err(BillingError::Unauthorized("service secret not configured".into()));
    };
    let Some(provided) = bearer_token(headers) else {
        return Err(BillingError::Unauthorized("missing bearer token".into()));
    };
    if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        tracing::warn!(token = %token_fingerprint(provided), "service call rejected: wrong secret");
        return Err(BillingError::Unauthorized("invalid service secret".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::{DateTime, Duration, Utc};

    fn headers_with(token: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        h
    }

    fn claims(exp: DateTime<Utc>) -> AccessTokenClaims {
        AccessTokenClaims {
            sub: "user-1".into(),
            email: Some("a@b.c".into()),
            exp: exp.timestamp(),
            iat: None,
        }
    }

    #[test]
    fn signed_token_verifies() {
        let v = AuthVerifier::new(Some("s3cret"));
        let now = Utc::now();
        let token = v.sign(&claims(now + Duration::minutes(5))).unwrap();
        let user = v.current_user(&headers_with(&token)).unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(user.email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn rejects_expired_tampered_and_foreign_tokens() {
        let v = AuthVerifier::new(Some("s3cret"));
        let now = Utc::now();
        let expired = v.sign(&claims(now - Duration::seconds(1))).unwrap();
        assert!(v.verify(&expired).is_err());

        let token = v.sign(&claims(now + Duration::minutes(5))).unwrap();
        let other = AuthVerifier::new(Some("other"));
        assert!(other.verify(&token).is_err());

        // payload signed under another key spliced into a valid token
        let mut admin = claims(now + Duration::minutes(5));
        admin.sub = "admin".into();
        let foreign = other.sign(&admin).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = foreign.split('.').nth(1).unwrap();
        assert!(v.verify(&parts.join(".")).is_err());

        // {"alg":"none"} . {"sub":"x","exp":99999999999} . <empty>
        let none_alg = "eyJhbGciOiJub25lIn0.eyJzdWIiOiJ4IiwiZXhwIjo5OTk5OTk5OTk5OX0.";
        assert!(v.verify(none_alg).is_err());
        assert!(v.verify("garbage").is_err());
    }

    #[test]
    fn empty_subject_is_rejected() {
        let v = AuthVerifier::new(Some("s3cret"));
        let mut c = claims(Utc::now() + Duration::minutes(5));
        c.sub = "  ".into();
        let token = v.sign(&c).unwrap();
        assert!(matches!(v.verify(&token), Err(BillingError::Unauthorized(_))));
    }

    #[test]
    fn missing_secret_rejects_tokens() {
        let v = AuthVerifier::new(None);
        assert!(v.current_user(&headers_with("a.b.c")).is_none());
        assert!(v.current_user(&HeaderMap::new()).is_none());
    }

    #[test]
    fn service_secret_must_match() {
        assert!(require_service_secret(&headers_with("cron"), Some("cron")).is_ok());
        assert!(require_service_secret(&headers_with("cron2"), Some("cron")).is_err());
        assert!(require_service_secret(&HeaderMap::new(), Some("cron")).is_err());
        assert!(require_service_secret(&headers_with("cron"), None).is_err());
        assert!(require_service_secret(&headers_with(""), Some("")).is_err());
    }
}
