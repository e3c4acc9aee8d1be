use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Minimum lifetime given to a stored record, so a save that lands seconds
/// before midnight is not evicted before the gate reads it back.
pub const MIN_TTL_SECS: i64 = 60;

/// Per-user, per-day counters.
///
/// `reset_at` is the epoch second of the next UTC midnight; `0` means the
/// record was never initialised (the zero record returned for a missing key).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    #[serde(default)]
    pub calls: u64,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub reset_at: i64,
}

impl UsageRecord {
    /// A zeroed record valid until the UTC midnight following `now`.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            calls: 0,
            tokens: 0,
            reset_at: next_utc_midnight(now).timestamp(),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.reset_at <= 0 || now.timestamp() >= self.reset_at
    }

    /// Seconds a backend with expiry should keep this record alive.
    pub fn ttl_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.reset_at - now.timestamp()).max(MIN_TTL_SECS)
    }

    /// Field-wise maximum of two views of the same key. Counters only grow
    /// within a day, so the larger value is the one that survived.
    pub fn merge_max(&self, other: &UsageRecord) -> UsageRecord {
        UsageRecord {
            calls: self.calls.max(other.calls),
            tokens: self.tokens.max(other.tokens),
            reset_at: self.reset_at.max(other.reset_at),
        }
    }
}

pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    tomorrow.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Store key for `user` on the UTC calendar day `day`.
pub fn usage_key(user: &str, day: NaiveDate) -> String {
    format!("usage:{}:{}", user, day.format("%Y-%m-%d"))
}
