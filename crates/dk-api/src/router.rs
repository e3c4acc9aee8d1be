use axum::http::{header, HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::identity_middleware;
use crate::rest::{chat, health, usage};
use crate::state::AppState;
use crate::usage::{usage_middleware, RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET};

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let origin = HeaderValue::from_str(frontend_url).unwrap_or_else(|_| {
        tracing::warn!("Invalid frontend_url {:?}, using localhost", frontend_url);
        HeaderValue::from_static("http://localhost:5173")
    });

    CorsLayer::new()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET])
        .allow_credentials(true)
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.frontend_url);

    // Public routes (no identity needed)
    let public_routes = Router::new().route("/api/v1/health", get(health::health));

    // Billed routes: every request is admitted against the daily budget
    let metered_routes = Router::new()
        .route("/api/v1/ai/chat", post(chat::chat))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            usage_middleware,
        ));

    // Identity is resolved before the gate runs
    let identified_routes = Router::new()
        .route("/api/v1/usage", get(usage::current))
        .merge(metered_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(identified_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
