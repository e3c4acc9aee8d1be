use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::{Clock, SystemClock};
use crate::error::QuotaError;
use crate::migrations;
use crate::record::UsageRecord;
use crate::store::{QuotaStore, SWEEP_INTERVAL_SECS};

/// Durable single-node store backed by a SQLite file.
///
/// Expired rows are purged on open and then from `save` at most once every
/// [`SWEEP_INTERVAL_SECS`].
pub struct SqliteQuotaStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    last_purge: AtomicI64,
}

impl SqliteQuotaStore {
    pub fn open(path: &Path) -> Result<Self, QuotaError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn, Arc::new(SystemClock))
    }

    pub fn in_memory() -> Result<Self, QuotaError> {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self, QuotaError> {
        Self::init(Connection::open_in_memory()?, clock)
    }

    fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, QuotaError> {
        migrations::run_migrations(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
            clock,
            last_purge: AtomicI64::new(0),
        };
        store.purge_if_due(store.clock.now().timestamp())?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, QuotaError> {
        self.conn
            .lock()
            .map_err(|_| QuotaError::store("sqlite connection lock poisoned"))
    }

    /// Deletes rows whose TTL has passed. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, QuotaError> {
        let now = self.clock.now().timestamp();
        self.last_purge.store(now, Ordering::Relaxed);
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM usage_counters WHERE expires_at <= ?1", [now])?;
        Ok(removed)
    }

    fn purge_if_due(&self, now: i64) -> Result<(), QuotaError> {
        if now - self.last_purge.load(Ordering::Relaxed) < SWEEP_INTERVAL_SECS {
            return Ok(());
        }
        let purged = self.purge_expired()?;
        if purged > 0 {
            tracing::debug!("Purged {} expired usage counters", purged);
        }
        Ok(())
    }
}

fn to_db(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_db(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

#[async_trait]
impl QuotaStore for SqliteQuotaStore {
    async fn load(&self, key: &str) -> Result<UsageRecord, QuotaError> {
        let now = self.clock.now().timestamp();
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT calls, tokens, reset_at FROM usage_counters
                 WHERE key = ?1 AND expires_at > ?2",
                rusqlite::params![key, now],
                |row| {
                    Ok(UsageRecord {
                        calls: from_db(row.get(0)?),
                        tokens: from_db(row.get(1)?),
                        reset_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record.unwrap_or_default())
    }

    async fn save(&self, key: &str, record: &UsageRecord) -> Result<(), QuotaError> {
        let now = self.clock.now();
        self.purge_if_due(now.timestamp())?;
        let expires_at = now.timestamp() + record.ttl_secs(now);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO usage_counters (key, calls, tokens, reset_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                calls = excluded.calls,
                tokens = excluded.tokens,
                reset_at = excluded.reset_at,
                expires_at = excluded.expires_at",
            rusqlite::params![
                key,
                to_db(record.calls),
                to_db(record.tokens),
                record.reset_at,
                expires_at,
            ],
        )?;
        Ok(())
    }

    async fn expire(&self, key: &str) -> Result<(), QuotaError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM usage_counters WHERE key = ?1", [key])?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
