use axum::extract::State;
use axum::{Extension, Json};
use dk_quota::{Caller, UsageSnapshot};

use crate::error::ApiErrorResponse;
use crate::state::AppState;

/// Caller's role, limits and today's counters. Does not count as a call.
pub async fn current(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<UsageSnapshot>, ApiErrorResponse> {
    let snapshot = state.usage_gate.snapshot(&caller).await?;
    Ok(Json(snapshot))
}
