use std::path::Path;
use std::sync::Arc;

use crate::error::QuotaError;
use crate::memory::MemoryQuotaStore;
use crate::redis_store::RedisQuotaStore;
use crate::resilient::{ResilientStore, StoreFailurePolicy};
use crate::sqlite::SqliteQuotaStore;
use crate::store::QuotaStore;

#[derive(Debug, PartialEq, Eq)]
enum Backend<'a> {
    Memory,
    Redis(&'a str),
    Sqlite(&'a str),
}

fn parse_url(url: Option<&str>) -> Result<Backend<'_>, QuotaError> {
    let url = match url.map(str::trim) {
        None | Some("") => return Ok(Backend::Memory),
        Some(u) => u,
    };
    if url == "memory" || url == "memory://" {
        Ok(Backend::Memory)
    } else if url.starts_with("redis://") || url.starts_with("rediss://") {
        Ok(Backend::Redis(url))
    } else if let Some(path) = url.strip_prefix("sqlite://") {
        if path.is_empty() {
            return Err(QuotaError::store("sqlite:// url is missing a file path"));
        }
        Ok(Backend::Sqlite(path))
    } else {
        Err(QuotaError::store(format!(
            "unsupported quota store url {:?} (expected redis://, rediss://, sqlite:// or memory)",
            url
        )))
    }
}

/// Builds the quota store named by `url`.
///
/// `None` selects process-local memory. External stores are wrapped in a
/// [`ResilientStore`] following `policy`; if the initial connection fails,
/// `FailOpen` starts on memory with a warning and `FailClosed` returns the
/// error.
pub async fn connect_store(
    url: Option<&str>,
    policy: StoreFailurePolicy,
) -> Result<Arc<dyn QuotaStore>, QuotaError> {
    let opened: Result<Arc<dyn QuotaStore>, QuotaError> = match parse_url(url)? {
        Backend::Memory => {
            tracing::info!(
                "Quota store: in-memory (counters are per process and reset on restart)"
            );
            return Ok(Arc::new(MemoryQuotaStore::new()));
        }
        Backend::Redis(u) => RedisQuotaStore::connect(u)
            .await
            .map(|s| Arc::new(s) as Arc<dyn QuotaStore>),
        Backend::Sqlite(path) => {
            SqliteQuotaStore::open(Path::new(path)).map(|s| Arc::new(s) as Arc<dyn QuotaStore>)
        }
    };

    match opened {
        Ok(primary) => {
            tracing::info!("Quota store: {} ({:?})", primary.backend(), policy);
            Ok(Arc::new(ResilientStore::new(primary, policy)))
        }
        Err(e) if policy == StoreFailurePolicy::FailOpen => {
            tracing::warn!(
                "Could not open quota store, falling back to in-memory counters: {}",
                e
            );
            Ok(Arc::new(MemoryQuotaStore::new()))
        }
        Err(e) => Err(e),
    }
}
