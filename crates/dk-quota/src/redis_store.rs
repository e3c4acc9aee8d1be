use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::QuotaError;
use crate::record::UsageRecord;
use crate::store::QuotaStore;

/// Shared store backed by Redis. Records are JSON strings written with
/// `SET .. EX` so they drop out on their own after the day ends.
pub struct RedisQuotaStore {
    conn: ConnectionManager,
    key_prefix: String,
    clock: Arc<dyn Clock>,
}

impl RedisQuotaStore {
    pub async fn connect(url: &str) -> Result<Self, QuotaError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, String::new()))
    }

    pub fn new(conn: ConnectionManager, key_prefix: String) -> Self {
        Self {
            conn,
            key_prefix,
            clock: Arc::new(SystemClock),
        }
    }

    fn make_key(&self, key: &str) -> String {
        build_key(&self.key_prefix, key)
    }
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn load(&self, key: &str) -> Result<UsageRecord, QuotaError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.make_key(key))
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(json) => decode(&json),
            None => Ok(UsageRecord::default()),
        }
    }

    async fn save(&self, key: &str, record: &UsageRecord) -> Result<(), QuotaError> {
        let cmd = set_command(&self.make_key(key), record, self.clock.now())?;
        let mut conn = self.conn.clone();
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn expire(&self, key: &str) -> Result<(), QuotaError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.make_key(key))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

fn build_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

/// `SET <key> <json> EX <ttl>` with the TTL floor applied.
fn set_command(
    key: &str,
    record: &UsageRecord,
    now: DateTime<Utc>,
) -> Result<redis::Cmd, QuotaError> {
    let body = serde_json::to_string(record)?;
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(body).arg("EX").arg(record.ttl_secs(now));
    Ok(cmd)
}

fn decode(json: &str) -> Result<UsageRecord, QuotaError> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::env;

    fn packed(parts: &[&str]) -> Vec<u8> {
        let mut out = format!("*{}\r\n", parts.len());
        for part in parts {
            out.push_str(&format!("${}\r\n{}\r\n", part.len(), part));
        }
        out.into_bytes()
    }

    #[test]
    fn set_command_expires_at_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 22, 0, 0).unwrap();
        let mut record = UsageRecord::fresh(now);
        record.calls = 2;
        record.tokens = 40;
        let cmd = set_command("usage:u1:2026-01-01", &record, now).unwrap();
        assert_eq!(
            cmd.get_packed_command(),
            packed(&[
                "SET",
                "usage:u1:2026-01-01",
                r#"{"calls":2,"tokens":40,"resetAt":1767312000}"#,
                "EX",
                "7200",
            ])
        );
    }

    #[test]
    fn set_command_applies_ttl_floor() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 23, 59, 50).unwrap();
        let record = UsageRecord::fresh(now);
        let cmd = set_command("k", &record, now).unwrap();
        let bytes = cmd.get_packed_command();
        assert!(bytes.ends_with(b"$2\r\nEX\r\n$2\r\n60\r\n"));
    }

    /// Connects to `DOCKET_REDIS_URL`; these tests need a running Redis.
    async fn live_store() -> (RedisQuotaStore, redis::aio::ConnectionManager) {
        let url =
            env::var("DOCKET_REDIS_URL").expect("DOCKET_REDIS_URL must be set for Redis tests");
        let store = RedisQuotaStore::connect(&url).await.unwrap();
        let conn = store.conn.clone();
        (store, conn)
    }

    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn live_save_load_expire() {
        let (store, mut conn) = live_store().await;
        let key = "usage:docket-test:live";
        let mut record = UsageRecord::fresh(Utc::now());
        record.calls = 4;
        record.tokens = 321;

        store.save(key, &record).await.unwrap();
        assert_eq!(store.load(key).await.unwrap(), record);

        let ttl: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(ttl >= 1 && ttl <= record.ttl_secs(Utc::now()) + 1);

        store.expire(key).await.unwrap();
        assert_eq!(store.load(key).await.unwrap(), UsageRecord::default());
        store.expire(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn live_missing_key_is_zero_record() {
        let (store, _conn) = live_store().await;
        let record = store.load("usage:docket-test:absent").await.unwrap();
        assert_eq!(record, UsageRecord::default());
    }

    #[test]
    fn key_without_prefix_is_unchanged() {
        assert_eq!(
            build_key("", "usage:u1:2026-01-01"),
            "usage:u1:2026-01-01"
        );
    }

    #[test]
    fn key_with_prefix() {
        assert_eq!(
            build_key("docket:", "usage:u1:2026-01-01"),
            "docket:usage:u1:2026-01-01"
        );
    }

    #[test]
    fn decode_stored_json() {
        let record = decode(r#"{"calls":3,"tokens":700,"resetAt":1767225600}"#).unwrap();
        assert_eq!(record.calls, 3);
        assert_eq!(record.tokens, 700);
        assert_eq!(record.reset_at, 1_767_225_600);
    }

    #[test]
    fn decode_garbage_is_store_error() {
        let err = decode("not json").unwrap_err();
        assert_eq!(err.error_code(), "quota_store_unavailable");
    }

    #[tokio::test]
    async fn connect_rejects_bad_url() {
        assert!(RedisQuotaStore::connect("not-a-url").await.is_err());
    }
}
