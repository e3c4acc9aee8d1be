use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the issuer of user tokens. When unset every
    /// caller is treated as anonymous.
    #[serde(default, skip_serializing)]
    pub jwt_secret: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_parses_from_toml() {
        let auth: AuthConfig = toml::from_str("jwt_secret = \"s3cret\"\n").unwrap();
        assert_eq!(auth.jwt_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn secret_is_not_serialized() {
        let auth = AuthConfig {
            jwt_secret: Some("s3cret".to_string()),
        };
        assert!(!toml::to_string(&auth).unwrap().contains("s3cret"));
    }
}
