//! Admission control for billed language-model calls.
//!
//! A request goes through [`UsageGate::admit`] before the upstream call and
//! through [`UsageGate::settle`] after it:
//!
//! ```text
//! admit:  load -> (rollover: reset + save) -> calls >= cap? reject
//!                                          -> tokens >= cap? reject
//!                                          -> calls += 1, save
//! settle: load -> tokens += used, save -> projected > cap? flag
//! ```
//!
//! Both steps are plain read-modify-write against the [`QuotaStore`]. Two
//! requests racing on the last free call can both be admitted; the overshoot
//! is bounded by the number of concurrent requests for that user.

use serde::Serialize;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::QuotaError;
use crate::record::{usage_key, UsageRecord};
use crate::role::{LimitsTable, Role, RoleLimits};
use crate::store::QuotaStore;

/// Identity the gate meters against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub role: Role,
}

impl Caller {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// An unauthenticated caller, metered at the lowest tier under `source`
    /// (typically the client address).
    pub fn anonymous(source: &str) -> Self {
        Self {
            id: format!("anon:{}", source),
            role: Role::Free,
        }
    }
}

/// Handed to the route handler once a request is admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub key: String,
    pub role: Role,
    pub limits: RoleLimits,
    /// Record as saved by the admission, `calls` already incremented.
    pub record: UsageRecord,
}

impl Admission {
    pub fn calls_remaining(&self) -> u64 {
        self.limits.calls_per_day.saturating_sub(self.record.calls)
    }
}

/// Result of charging tokens after the upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub record: UsageRecord,
    pub limits: RoleLimits,
    pub projected: u64,
}

impl Settlement {
    pub fn token_cap_exceeded(&self) -> bool {
        self.projected > self.limits.tokens_per_day
    }

    /// The token-quota failure to report alongside the delivered result, if
    /// this call pushed the caller over the daily token cap.
    pub fn token_overrun(&self) -> Option<QuotaError> {
        self.token_cap_exceeded()
            .then_some(QuotaError::TokenQuotaExceeded {
                limit: self.limits.tokens_per_day,
                used: self.projected,
                reset_at: self.record.reset_at,
            })
    }
}

/// Read-only view of a caller's quota for reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub role: Role,
    pub limits: RoleLimits,
    pub record: UsageRecord,
}

pub struct UsageGate {
    store: Arc<dyn QuotaStore>,
    limits: LimitsTable,
    clock: Arc<dyn Clock>,
}

impl UsageGate {
    pub fn new(store: Arc<dyn QuotaStore>, limits: LimitsTable) -> Self {
        Self::with_clock(store, limits, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn QuotaStore>,
        limits: LimitsTable,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            limits,
            clock,
        }
    }

    pub fn limits_for(&self, role: Role) -> RoleLimits {
        self.limits.get(role)
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }

    fn key_for(&self, caller: &Caller) -> String {
        usage_key(&caller.id, self.clock.now().date_naive())
    }

    /// Decides whether `caller` may make one more billed call today.
    pub async fn admit(&self, caller: &Caller) -> Result<Admission, QuotaError> {
        let limits = self.limits.get(caller.role);
        let now = self.clock.now();
        let key = usage_key(&caller.id, now.date_naive());

        let mut record = self.store.load(&key).await?;
        if record.is_stale(now) {
            record = UsageRecord::fresh(now);
            self.store.save(&key, &record).await?;
            tracing::debug!("Usage rollover for {} ({})", caller.id, key);
        }

        if record.calls >= limits.calls_per_day {
            tracing::warn!(
                "Call quota exhausted for {} [{}]: {}/{}",
                caller.id,
                caller.role,
                record.calls,
                limits.calls_per_day
            );
            return Err(QuotaError::CallQuotaExceeded {
                limit: limits.calls_per_day,
                reset_at: record.reset_at,
            });
        }

        if record.tokens >= limits.tokens_per_day {
            tracing::warn!(
                "Token quota exhausted for {} [{}]: {}/{}",
                caller.id,
                caller.role,
                record.tokens,
                limits.tokens_per_day
            );
            return Err(QuotaError::TokenQuotaExceeded {
                limit: limits.tokens_per_day,
                used: record.tokens,
                reset_at: record.reset_at,
            });
        }

        record.calls += 1;
        self.store.save(&key, &record).await?;
        tracing::debug!(
            "Admitted {} [{}]: call {}/{}",
            caller.id,
            caller.role,
            record.calls,
            limits.calls_per_day
        );

        Ok(Admission {
            key,
            role: caller.role,
            limits,
            record,
        })
    }

    /// Charges `used` tokens for an admitted call.
    ///
    /// The tokens are always recorded since the upstream already billed them;
    /// crossing the cap only shows up in the returned [`Settlement`] and blocks
    /// the next admission. Call once per admission.
    pub async fn settle(&self, admission: &Admission, used: u64) -> Result<Settlement, QuotaError> {
        let mut record = self.store.load(&admission.key).await?;
        if record.reset_at == 0 {
            // Evicted between admit and settle; keep the admission's window.
            record.reset_at = admission.record.reset_at;
            record.calls = record.calls.max(admission.record.calls);
        }
        let projected = record.tokens.saturating_add(used);
        record.tokens = projected;
        self.store.save(&admission.key, &record).await?;

        let settlement = Settlement {
            record,
            limits: admission.limits,
            projected,
        };
        if settlement.token_cap_exceeded() {
            tracing::warn!(
                "Token quota exceeded on {}: {}/{} (next call will be refused)",
                admission.key,
                projected,
                admission.limits.tokens_per_day
            );
        }
        Ok(settlement)
    }

    /// Current quota state without mutating the store. A stale record is
    /// reported as the fresh record the next admission would start from.
    pub async fn snapshot(&self, caller: &Caller) -> Result<UsageSnapshot, QuotaError> {
        let now = self.clock.now();
        let mut record = self.store.load(&self.key_for(caller)).await?;
        if record.is_stale(now) {
            record = UsageRecord::fresh(now);
        }
        Ok(UsageSnapshot {
            role: caller.role,
            limits: self.limits.get(caller.role),
            record,
        })
    }

    /// Drops today's counters for `caller`.
    pub async fn reset(&self, caller: &Caller) -> Result<(), QuotaError> {
        self.store.expire(&self.key_for(caller)).await
    }
}
