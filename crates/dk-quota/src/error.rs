#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("Daily request limit of {limit} reached; resets at {reset_at}")]
    CallQuotaExceeded { limit: u64, reset_at: i64 },
    #[error("Daily token limit of {limit} exceeded ({used} used); resets at {reset_at}")]
    TokenQuotaExceeded { limit: u64, used: u64, reset_at: i64 },
    #[error("Quota store unavailable: {0}")]
    StoreUnavailable(String),
}

impl QuotaError {
    pub fn error_code(&self) -> &'static str {
        match self {
            QuotaError::CallQuotaExceeded { .. } => "usage_exceeded",
            QuotaError::TokenQuotaExceeded { .. } => "token_usage_exceeded",
            QuotaError::StoreUnavailable(_) => "quota_store_unavailable",
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(
            self,
            QuotaError::CallQuotaExceeded { .. } | QuotaError::TokenQuotaExceeded { .. }
        )
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        QuotaError::StoreUnavailable(err.to_string())
    }
}

impl From<rusqlite::Error> for QuotaError {
    fn from(err: rusqlite::Error) -> Self {
        QuotaError::store(err)
    }
}

impl From<redis::RedisError> for QuotaError {
    fn from(err: redis::RedisError) -> Self {
        QuotaError::store(err)
    }
}

impl From<serde_json::Error> for QuotaError {
    fn from(err: serde_json::Error) -> Self {
        QuotaError::StoreUnavailable(format!("corrupt usage record: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let call = QuotaError::CallQuotaExceeded {
            limit: 3,
            reset_at: 0,
        };
        let token = QuotaError::TokenQuotaExceeded {
            limit: 1000,
            used: 1100,
            reset_at: 0,
        };
        let store = QuotaError::store("connection refused");
        assert_eq!(call.error_code(), "usage_exceeded");
        assert_eq!(token.error_code(), "token_usage_exceeded");
        assert_eq!(store.error_code(), "quota_store_unavailable");
    }

    #[test]
    fn only_limits_count_as_exceeded() {
        assert!(QuotaError::CallQuotaExceeded {
            limit: 1,
            reset_at: 0
        }
        .is_quota_exceeded());
        assert!(!QuotaError::store("down").is_quota_exceeded());
    }

    #[test]
    fn message_mentions_limit() {
        let err = QuotaError::TokenQuotaExceeded {
            limit: 1000,
            used: 1100,
            reset_at: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("1000"));
        assert!(msg.contains("1100"));
    }
}
