use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, SystemClock};
use crate::error::QuotaError;
use crate::record::UsageRecord;
use crate::store::{QuotaStore, SWEEP_INTERVAL_SECS};

struct Entry {
    record: UsageRecord,
    expires_at: i64,
}

/// Process-local store. Counters are lost on restart and are not shared
/// between server instances. Expired entries are dropped when read and swept
/// in bulk from `save` at most once every [`SWEEP_INTERVAL_SECS`].
pub struct MemoryQuotaStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    last_sweep: AtomicI64,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            last_sweep: AtomicI64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, QuotaError> {
        self.entries
            .lock()
            .map_err(|_| QuotaError::store("memory store lock poisoned"))
    }
}

impl Default for MemoryQuotaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn load(&self, key: &str) -> Result<UsageRecord, QuotaError> {
        let now = self.clock.now().timestamp();
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(entry.record),
            Some(_) => {
                entries.remove(key);
                Ok(UsageRecord::default())
            }
            None => Ok(UsageRecord::default()),
        }
    }

    async fn save(&self, key: &str, record: &UsageRecord) -> Result<(), QuotaError> {
        let now = self.clock.now();
        let now_secs = now.timestamp();
        let expires_at = now_secs + record.ttl_secs(now);
        let mut entries = self.lock()?;
        if now_secs - self.last_sweep.load(Ordering::Relaxed) >= SWEEP_INTERVAL_SECS {
            self.last_sweep.store(now_secs, Ordering::Relaxed);
            let before = entries.len();
            entries.retain(|_, e| e.expires_at > now_secs);
            let swept = before - entries.len();
            if swept > 0 {
                tracing::debug!("Swept {} expired in-memory usage records", swept);
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                record: *record,
                expires_at,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str) -> Result<(), QuotaError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
