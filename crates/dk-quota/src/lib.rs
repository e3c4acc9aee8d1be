pub mod clock;
pub mod connect;
pub mod error;
pub mod gate;
pub mod memory;
pub mod migrations;
pub mod record;
pub mod redis_store;
pub mod resilient;
pub mod role;
pub mod sqlite;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connect::connect_store;
pub use error::QuotaError;
pub use gate::{Admission, Caller, Settlement, UsageGate, UsageSnapshot};
pub use memory::MemoryQuotaStore;
pub use redis_store::RedisQuotaStore;
pub use record::{next_utc_midnight, usage_key, UsageRecord};
pub use resilient::{ResilientStore, StoreFailurePolicy};
pub use role::{LimitsTable, Role, RoleLimits};
pub use sqlite::SqliteQuotaStore;
pub use store::QuotaStore;
