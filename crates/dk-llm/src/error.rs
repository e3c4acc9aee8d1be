#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Language model provider is not configured")]
    NotConfigured,
    #[error("Language model request timed out after {0}s")]
    Timeout(u64),
    #[error("Language model provider rejected credentials")]
    Unauthorized,
    #[error("Language model provider is rate limiting requests")]
    RateLimited,
    #[error("Language model provider returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("Malformed provider response: {0}")]
    Decode(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl LlmError {
    pub fn error_code(&self) -> &'static str {
        match self {
            LlmError::NotConfigured => "LLM_NOT_CONFIGURED",
            LlmError::Timeout(_) => "LLM_TIMEOUT",
            LlmError::Unauthorized => "LLM_AUTH_FAILED",
            LlmError::RateLimited => "LLM_RATE_LIMITED",
            LlmError::Upstream { .. } => "LLM_UPSTREAM_ERROR",
            LlmError::Decode(_) => "LLM_BAD_RESPONSE",
            LlmError::Http(_) => "LLM_UNREACHABLE",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout(_) | LlmError::RateLimited | LlmError::Http(_) => true,
            LlmError::Upstream { status, .. } => *status >= 500,
            LlmError::NotConfigured | LlmError::Unauthorized | LlmError::Decode(_) => false,
        }
    }
}
