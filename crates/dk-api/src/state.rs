use dk_config::ServerConfig;
use dk_llm::{ChatProvider, OpenAiClient, OpenAiOptions};
use dk_quota::{connect_store, UsageGate};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenVerifier;

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub usage_gate: Arc<UsageGate>,
    pub provider: Arc<dyn ChatProvider>,
    pub llm_configured: bool,
    pub verifier: Option<Arc<TokenVerifier>>,
    pub version: &'static str,
}

impl AppState {
    /// Connects the quota store and builds the OpenAI client from `config`.
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let store = connect_store(
            config.quota.store_url.as_deref(),
            config.quota.on_store_error,
        )
        .await?;
        let usage_gate = Arc::new(UsageGate::new(store, config.quota.limits.clone()));

        let client = OpenAiClient::new(OpenAiOptions {
            api_key: config.llm.api_key.clone(),
            base_url: config.llm.base_url.clone(),
            timeout: Duration::from_secs(config.llm.timeout_secs),
        })?;
        let llm_configured = client.has_api_key();
        if !llm_configured {
            tracing::warn!(
                "OPENAI_API_KEY is not set; chat requests will fail with LLM_NOT_CONFIGURED"
            );
        }

        Ok(Self::from_parts(config, usage_gate, Arc::new(client), llm_configured))
    }

    /// Assembles state from prebuilt parts. The token verifier is derived
    /// from `config.auth`.
    pub fn from_parts(
        config: ServerConfig,
        usage_gate: Arc<UsageGate>,
        provider: Arc<dyn ChatProvider>,
        llm_configured: bool,
    ) -> Self {
        let verifier = config
            .auth
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|secret| Arc::new(TokenVerifier::new(secret)));
        if verifier.is_none() {
            tracing::info!("No jwt_secret configured; all callers are metered anonymously");
        }
        Self {
            config,
            usage_gate,
            provider,
            llm_configured,
            verifier,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
