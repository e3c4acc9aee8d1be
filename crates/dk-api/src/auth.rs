use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use dk_quota::{Caller, Role};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use std::net::SocketAddr;

use crate::error::{ApiError, ApiErrorResponse};
use crate::state::AppState;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token has no subject")]
    MissingSubject,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            _ => TokenError::Invalid(err.to_string()),
        }
    }
}

/// Identity claims carried by a user token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl Claims {
    /// Reads `sub` (or `id`, string or number), `role` and `exp` from a JWT
    /// payload.
    fn from_value(value: &serde_json::Value) -> Result<Self, TokenError> {
        let subject = value.get("sub").or_else(|| value.get("id"));
        let sub = match subject {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err(TokenError::MissingSubject),
        };
        Ok(Self {
            sub,
            role: value.get("role").and_then(|r| r.as_str()).map(str::to_string),
            exp: value.get("exp").and_then(|e| e.as_i64()),
        })
    }

    pub fn caller(&self) -> Caller {
        let role = self
            .role
            .as_deref()
            .map(Role::from_claim)
            .unwrap_or_default();
        Caller::new(self.sub.clone(), role)
    }
}

/// Verifies and issues HS256 user tokens.
///
/// `exp` is optional; when present it is enforced with no leeway. Tokens
/// signed with any other algorithm are refused.
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_ref()),
            decoding: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<serde_json::Value>(token, &self.decoding, &self.validation)?;
        Claims::from_value(&data.claims)
    }
}

pub fn extract_bearer_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn client_source(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Attaches a [`Caller`] to every request.
///
/// No bearer token means an anonymous FREE caller keyed by client address.
/// A token that fails verification is rejected rather than downgraded.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiErrorResponse> {
    let caller = match (extract_bearer_from_headers(req.headers()), &state.verifier) {
        (Some(token), Some(verifier)) => {
            let claims = verifier.verify(&token).map_err(|e| {
                tracing::debug!("Rejected bearer token: {}", e);
                ApiErrorResponse {
                    status: StatusCode::UNAUTHORIZED,
                    error: ApiError::invalid_token(),
                }
            })?;
            claims.caller()
        }
        (Some(_), None) => {
            tracing::debug!("Bearer token ignored: no jwt_secret configured");
            Caller::anonymous(&client_source(&req))
        }
        (None, _) => Caller::anonymous(&client_source(&req)),
    };

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
