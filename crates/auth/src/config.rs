//! Identity and credential policy settings.
//!
//! Every field has a default so a partial TOML table is enough.

use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub session: SessionSettings,
    pub lockout: LockoutSettings,
    pub password: PasswordSettings,
    pub hashing: HashingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Idle time after which a session is invalid.
    pub idle_timeout_secs: i64,
    pub remember_me_days: i64,
    /// HMAC key for session seals. Empty means a random per-process key.
    pub seal_secret: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            remember_me_days: 30,
            seal_secret: String::new(),
        }
    }
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::seconds(self.idle_timeout_secs)
    }

    pub fn remember_me_ttl(&self) -> Duration {
        Duration::days(self.remember_me_days)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutSettings {
    pub max_attempts: u32,
    pub lock_minutes: i64,
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lock_minutes: 15,
        }
    }
}

impl LockoutSettings {
    pub fn lock_duration(&self) -> Duration {
        Duration::minutes(self.lock_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordSettings {
    pub min_length: usize,
    pub require_mixed_case: bool,
    pub require_digit: bool,
    /// Compared case-insensitively against the whole password.
    pub deny_list: Vec<String>,
    pub max_age_days: i64,
    pub history_depth: usize,
    pub reset_token_ttl_minutes: i64,
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_mixed_case: true,
            require_digit: true,
            deny_list: ["123456", "password", "qwerty", "admin", "welcome"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_age_days: 90,
            history_depth: 5,
            reset_token_ttl_minutes: 60,
        }
    }
}

impl PasswordSettings {
    pub fn max_age(&self) -> Duration {
        Duration::days(self.max_age_days)
    }

    pub fn reset_token_ttl(&self) -> Duration {
        Duration::minutes(self.reset_token_ttl_minutes)
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingSettings {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl HashingSettings {
    /// Smallest parameters argon2 accepts; for tests and local tooling only.
    pub fn minimal() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}
