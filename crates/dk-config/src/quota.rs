use dk_quota::{LimitsTable, StoreFailurePolicy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// `redis://..`, `rediss://..`, `sqlite://<path>` or unset for in-memory.
    #[serde(default)]
    pub store_url: Option<String>,
    #[serde(default)]
    pub on_store_error: StoreFailurePolicy,
    #[serde(default)]
    pub limits: LimitsTable,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            on_store_error: StoreFailurePolicy::default(),
            limits: LimitsTable::default(),
        }
    }
}

impl QuotaConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for role in dk_quota::Role::ALL {
            let limits = self.limits.get(role);
            let section = role.as_str().to_ascii_lowercase();
            if limits.calls_per_day == 0 {
                anyhow::bail!("quota.limits.{section}.calls_per_day must be greater than 0");
            }
            if limits.tokens_per_day == 0 {
                anyhow::bail!("quota.limits.{section}.tokens_per_day must be greater than 0");
            }
        }
        Ok(())
    }
}
