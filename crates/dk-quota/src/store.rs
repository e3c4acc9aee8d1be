use async_trait::async_trait;

use crate::error::QuotaError;
use crate::record::UsageRecord;

/// Minimum gap between bulk sweeps of expired records in backends without
/// native expiry.
pub(crate) const SWEEP_INTERVAL_SECS: i64 = 300;

/// Persistence for [`UsageRecord`]s keyed by `usage:<user>:<day>`.
///
/// A missing key is not an error: `load` returns the zero record. Backends
/// with expiry keep a saved record for at least [`UsageRecord::ttl_secs`].
/// `save` overwrites; calling it twice with the same record leaves the same
/// state behind.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<UsageRecord, QuotaError>;

    async fn save(&self, key: &str, record: &UsageRecord) -> Result<(), QuotaError>;

    async fn expire(&self, key: &str) -> Result<(), QuotaError>;

    /// Short backend name for logs and the health endpoint.
    fn backend(&self) -> &'static str;
}
