use serde::{Deserialize, Serialize};
use std::env;
use std::net::{IpAddr, Ipv4Addr};

use crate::auth::AuthConfig;
use crate::llm::LlmConfig;
use crate::paths::ConfigPaths;
use crate::quota::QuotaConfig;

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    8787
}

fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}

/// Environment variables that take precedence over `config.toml`.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_QUOTA_STORE_URL: &str = "DOCKET_QUOTA_STORE_URL";
pub const ENV_JWT_SECRET: &str = "DOCKET_JWT_SECRET";
pub const ENV_FRONTEND_URL: &str = "DOCKET_FRONTEND_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(skip)]
    paths: Option<ConfigPaths>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            frontend_url: default_frontend_url(),
            quota: QuotaConfig::default(),
            llm: LlmConfig::default(),
            auth: AuthConfig::default(),
            paths: None,
        }
    }
}

impl ServerConfig {
    /// Returns the `ConfigPaths` for this config, defaulting to `~/.docket`.
    pub fn paths(&self) -> anyhow::Result<ConfigPaths> {
        match &self.paths {
            Some(p) => Ok(p.clone()),
            None => ConfigPaths::new(),
        }
    }

    pub fn set_paths(&mut self, paths: ConfigPaths) {
        self.paths = Some(paths);
    }

    /// Load config from the default location (`~/.docket/config.toml`).
    pub fn load() -> anyhow::Result<Self> {
        let paths = ConfigPaths::new()?;
        Self::load_from(&paths)
    }

    /// Load config from a specific `ConfigPaths`, then apply environment
    /// overrides. A missing file yields the defaults.
    pub fn load_from(paths: &ConfigPaths) -> anyhow::Result<Self> {
        Self::load_with_env(paths, |name| env::var(name).ok())
    }

    /// Same as [`ServerConfig::load_from`] with an explicit environment
    /// lookup.
    pub fn load_with_env(
        paths: &ConfigPaths,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let config_file = paths.config_path();
        let mut config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)?;
            let config: ServerConfig = toml::from_str(&content)?;
            config
        } else {
            Self::default()
        };
        config.apply_env(lookup);
        config.resolve_store_url(paths)?;
        config.paths = Some(paths.clone());
        config.validate()?;
        Ok(config)
    }

    /// Overwrites file values with non-empty environment values.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = get(ENV_OPENAI_API_KEY) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = get(ENV_QUOTA_STORE_URL) {
            self.quota.store_url = Some(url);
        }
        if let Some(secret) = get(ENV_JWT_SECRET) {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(url) = get(ENV_FRONTEND_URL) {
            self.frontend_url = url;
        }
    }

    /// A bare `sqlite` store URL points at `quota.db` in the config directory.
    fn resolve_store_url(&mut self, paths: &ConfigPaths) -> anyhow::Result<()> {
        let bare = matches!(
            self.quota.store_url.as_deref().map(str::trim),
            Some("sqlite") | Some("sqlite://")
        );
        if bare {
            paths.ensure_config_dir()?;
            self.quota.store_url = Some(format!("sqlite://{}", paths.quota_db_path().display()));
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must not be 0");
        }
        if self.frontend_url.is_empty() {
            anyhow::bail!("frontend_url must not be empty");
        }
        self.quota.validate()?;
        self.llm.validate()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Printable TOML of the effective config. Secrets are omitted.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
