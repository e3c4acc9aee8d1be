//! Shared helpers used by the `docketd` binary.

use dk_api::auth::{Claims, TokenVerifier};
use dk_api::rest::health::init_start_time;
use dk_api::{build_router, AppState};
use dk_config::ServerConfig;
use dk_quota::Role;
use std::net::SocketAddr;

/// Build-time daemon version string.
///
/// `DOCKETD_VERSION` from the build environment wins over the crate version.
pub const DAEMON_VERSION: &str = match option_env!("DOCKETD_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

/// Signs a development token for `user` with the configured secret.
///
/// `ttl_secs` of 0 produces a token without `exp`.
pub fn mint_token(
    config: &ServerConfig,
    user: &str,
    role: Role,
    ttl_secs: u64,
    now: i64,
) -> anyhow::Result<String> {
    let secret = config
        .auth
        .jwt_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!("no jwt_secret configured (set [auth] jwt_secret or DOCKET_JWT_SECRET)")
        })?;
    if user.trim().is_empty() {
        anyhow::bail!("user must not be empty");
    }
    let exp = match ttl_secs {
        0 => None,
        ttl => Some(now.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX))),
    };
    let claims = Claims {
        sub: user.to_string(),
        role: Some(role.as_str().to_string()),
        exp,
    };
    Ok(TokenVerifier::new(secret).sign(&claims)?)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl+c: {}", e);
        }
    }
    tracing::info!("Shutting down...");
}

/// Runs the HTTP server until SIGINT/SIGTERM.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    init_start_time();

    let addr: SocketAddr = config.bind_addr().parse()?;
    let state = AppState::new(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
