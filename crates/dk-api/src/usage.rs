use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dk_quota::{Caller, QuotaError};

use crate::error::ApiErrorResponse;
use crate::state::AppState;

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

fn set_header(response: &mut Response, name: HeaderName, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        response.headers_mut().insert(name, value);
    }
}

/// Gate in front of billed routes.
///
/// Admits the request against the caller's daily call budget and hands the
/// `Admission` to the handler through request extensions. Rejected requests
/// never reach the handler.
pub async fn usage_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let caller = req
        .extensions()
        .get::<Caller>()
        .cloned()
        .unwrap_or_else(|| Caller::anonymous("unknown"));

    let admission = match state.usage_gate.admit(&caller).await {
        Ok(admission) => admission,
        Err(err) => return rejection(err),
    };

    let limit = admission.limits.calls_per_day;
    let remaining = admission.calls_remaining();
    let reset_at = admission.record.reset_at;
    req.extensions_mut().insert(admission);

    let mut response = next.run(req).await;
    set_header(&mut response, RATELIMIT_LIMIT, limit);
    set_header(&mut response, RATELIMIT_REMAINING, remaining);
    set_header(&mut response, RATELIMIT_RESET, reset_at);
    response
}

fn rejection(err: QuotaError) -> Response {
    let headers = match &err {
        QuotaError::CallQuotaExceeded { limit, reset_at } => Some((*limit, *reset_at)),
        QuotaError::TokenQuotaExceeded { reset_at, .. } => Some((0, *reset_at)),
        QuotaError::StoreUnavailable(_) => None,
    };
    let mut response = ApiErrorResponse::from(err).into_response();
    if let Some((limit, reset_at)) = headers {
        if limit > 0 {
            set_header(&mut response, RATELIMIT_LIMIT, limit);
        }
        set_header(&mut response, RATELIMIT_REMAINING, 0);
        set_header(&mut response, RATELIMIT_RESET, reset_at);
    }
    response
}
