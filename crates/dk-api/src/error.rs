use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dk_llm::LlmError;
use dk_quota::QuotaError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub retryable: bool,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_token() -> Self {
        Self::new("INVALID_TOKEN", "Invalid or expired token")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("INVALID_REQUEST", message)
    }

    pub fn quota_error(err: &QuotaError) -> (StatusCode, Self) {
        let api = Self::new(err.error_code(), err.to_string());
        match err {
            QuotaError::CallQuotaExceeded { limit, reset_at } => (
                StatusCode::TOO_MANY_REQUESTS,
                api.with_details(serde_json::json!({
                    "limit": limit,
                    "resetAt": reset_at,
                })),
            ),
            QuotaError::TokenQuotaExceeded {
                limit,
                used,
                reset_at,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                api.with_details(serde_json::json!({
                    "limit": limit,
                    "used": used,
                    "resetAt": reset_at,
                })),
            ),
            QuotaError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, api.retryable()),
        }
    }

    pub fn llm_error(err: &LlmError) -> (StatusCode, Self) {
        let status = match err {
            LlmError::NotConfigured | LlmError::RateLimited => StatusCode::SERVICE_UNAVAILABLE,
            LlmError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            LlmError::Unauthorized
            | LlmError::Upstream { .. }
            | LlmError::Decode(_)
            | LlmError::Http(_) => StatusCode::BAD_GATEWAY,
        };
        let mut api = Self::new(err.error_code(), err.to_string());
        api.retryable = err.is_retryable();
        (status, api)
    }
}

#[derive(Debug)]
pub struct ApiErrorResponse {
    pub status: StatusCode,
    pub error: ApiError,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let body = serde_json::to_string(&self.error).unwrap_or_default();
        (self.status, [("content-type", "application/json")], body).into_response()
    }
}

impl From<(StatusCode, ApiError)> for ApiErrorResponse {
    fn from((status, error): (StatusCode, ApiError)) -> Self {
        Self { status, error }
    }
}

impl From<QuotaError> for ApiErrorResponse {
    fn from(err: QuotaError) -> Self {
        ApiError::quota_error(&err).into()
    }
}

impl From<LlmError> for ApiErrorResponse {
    fn from(err: LlmError) -> Self {
        ApiError::llm_error(&err).into()
    }
}
