use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::QuotaError;
use crate::memory::MemoryQuotaStore;
use crate::record::UsageRecord;
use crate::store::QuotaStore;

/// What to do when the configured quota store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Keep admitting traffic, counting in process-local memory until the
    /// primary store answers again.
    #[default]
    FailOpen,
    /// Surface `StoreUnavailable` to the caller.
    FailClosed,
}

/// Wraps a primary store with a process-local fallback.
///
/// Under [`StoreFailurePolicy::FailOpen`] every failed primary operation is
/// replayed against the fallback map, so counting continues (per process, lost
/// on restart) while the primary is down.
///
/// A key that was served from the fallback is remembered until its next
/// successful primary write. Until then loads and saves are merged field-wise
/// with [`UsageRecord::merge_max`], so a record built from the fallback can
/// never lower the counters the primary already holds.
pub struct ResilientStore {
    primary: Arc<dyn QuotaStore>,
    fallback: MemoryQuotaStore,
    policy: StoreFailurePolicy,
    degraded: Mutex<HashSet<String>>,
}

impl ResilientStore {
    pub fn new(primary: Arc<dyn QuotaStore>, policy: StoreFailurePolicy) -> Self {
        Self {
            primary,
            fallback: MemoryQuotaStore::new(),
            policy,
            degraded: Mutex::new(HashSet::new()),
        }
    }

    fn degrade(&self, op: &str, err: QuotaError) -> Result<(), QuotaError> {
        match self.policy {
            StoreFailurePolicy::FailOpen => {
                tracing::warn!(
                    "Quota store {} {} failed, using in-memory fallback: {}",
                    self.primary.backend(),
                    op,
                    err
                );
                Ok(())
            }
            StoreFailurePolicy::FailClosed => Err(err),
        }
    }

    fn degraded(&self) -> Result<MutexGuard<'_, HashSet<String>>, QuotaError> {
        self.degraded
            .lock()
            .map_err(|_| QuotaError::store("degraded key set lock poisoned"))
    }

    fn is_degraded(&self, key: &str) -> Result<bool, QuotaError> {
        Ok(self.degraded()?.contains(key))
    }

    fn mark_degraded(&self, key: &str) -> Result<(), QuotaError> {
        self.degraded()?.insert(key.to_string());
        Ok(())
    }

    fn clear_degraded(&self, key: &str) -> Result<(), QuotaError> {
        self.degraded()?.remove(key);
        Ok(())
    }

    /// Writes `record` to the primary, merged with whatever the primary
    /// holds when the key was recently served from the fallback.
    async fn save_primary(&self, key: &str, record: &UsageRecord) -> Result<(), QuotaError> {
        if !self.is_degraded(key)? {
            return self.primary.save(key, record).await;
        }
        let current = self.primary.load(key).await?;
        let merged = record.merge_max(&current);
        self.primary.save(key, &merged).await?;
        self.clear_degraded(key)?;
        tracing::info!("Quota store {} reconciled {}", self.primary.backend(), key);
        Ok(())
    }
}

#[async_trait]
impl QuotaStore for ResilientStore {
    async fn load(&self, key: &str) -> Result<UsageRecord, QuotaError> {
        match self.primary.load(key).await {
            Ok(record) => {
                if !self.is_degraded(key)? {
                    return Ok(record);
                }
                let local = self.fallback.load(key).await?;
                Ok(record.merge_max(&local))
            }
            Err(e) => {
                self.degrade("load", e)?;
                self.mark_degraded(key)?;
                self.fallback.load(key).await
            }
        }
    }

    async fn save(&self, key: &str, record: &UsageRecord) -> Result<(), QuotaError> {
        let degraded = self.is_degraded(key)?;
        match self.save_primary(key, record).await {
            Ok(()) => {
                if degraded {
                    self.fallback.expire(key).await?;
                }
                Ok(())
            }
            Err(e) => {
                self.degrade("save", e)?;
                self.mark_degraded(key)?;
                self.fallback.save(key, record).await
            }
        }
    }

    async fn expire(&self, key: &str) -> Result<(), QuotaError> {
        self.fallback.expire(key).await?;
        match self.primary.expire(key).await {
            Ok(()) => self.clear_degraded(key),
            Err(e) => self.degrade("expire", e),
        }
    }

    fn backend(&self) -> &'static str {
        self.primary.backend()
    }
}
