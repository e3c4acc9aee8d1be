use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription tier of a caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    Free,
    Plus,
    Pro,
    Lawyer,
    Admin,
}

impl Role {
    pub const ALL: [Role; 5] = [Role::Free, Role::Plus, Role::Pro, Role::Lawyer, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Free => "FREE",
            Role::Plus => "PLUS",
            Role::Pro => "PRO",
            Role::Lawyer => "LAWYER",
            Role::Admin => "ADMIN",
        }
    }

    /// Parses a role claim. Unknown or empty values fall back to [`Role::Free`].
    pub fn from_claim(claim: &str) -> Self {
        match claim.trim().to_ascii_uppercase().as_str() {
            "FREE" => Role::Free,
            "PLUS" => Role::Plus,
            "PRO" => Role::Pro,
            "LAWYER" => Role::Lawyer,
            "ADMIN" => Role::Admin,
            other => {
                if !other.is_empty() {
                    tracing::debug!("Unknown role {:?}, treating caller as FREE", other);
                }
                Role::Free
            }
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLimits {
    pub calls_per_day: u64,
    pub tokens_per_day: u64,
}

impl RoleLimits {
    pub const fn new(calls_per_day: u64, tokens_per_day: u64) -> Self {
        Self {
            calls_per_day,
            tokens_per_day,
        }
    }
}

fn default_free() -> RoleLimits {
    RoleLimits::new(20, 20_000)
}

fn default_plus() -> RoleLimits {
    RoleLimits::new(100, 100_000)
}

fn default_pro() -> RoleLimits {
    RoleLimits::new(500, 500_000)
}

fn default_lawyer() -> RoleLimits {
    RoleLimits::new(1_000, 1_000_000)
}

fn default_admin() -> RoleLimits {
    RoleLimits::new(10_000, 10_000_000)
}

/// Daily limits for every role. Each role has exactly one entry, so lookups
/// cannot miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsTable {
    #[serde(default = "default_free")]
    pub free: RoleLimits,
    #[serde(default = "default_plus")]
    pub plus: RoleLimits,
    #[serde(default = "default_pro")]
    pub pro: RoleLimits,
    #[serde(default = "default_lawyer")]
    pub lawyer: RoleLimits,
    #[serde(default = "default_admin")]
    pub admin: RoleLimits,
}

impl Default for LimitsTable {
    fn default() -> Self {
        Self {
            free: default_free(),
            plus: default_plus(),
            pro: default_pro(),
            lawyer: default_lawyer(),
            admin: default_admin(),
        }
    }
}

impl LimitsTable {
    pub fn get(&self, role: Role) -> RoleLimits {
        match role {
            Role::Free => self.free,
            Role::Plus => self.plus,
            Role::Pro => self.pro,
            Role::Lawyer => self.lawyer,
            Role::Admin => self.admin,
        }
    }

    pub fn set(&mut self, role: Role, limits: RoleLimits) {
        match role {
            Role::Free => self.free = limits,
            Role::Plus => self.plus = limits,
            Role::Pro => self.pro = limits,
            Role::Lawyer => self.lawyer = limits,
            Role::Admin => self.admin = limits,
        }
    }

    pub fn with(mut self, role: Role, limits: RoleLimits) -> Self {
        self.set(role, limits);
        self
    }
}
