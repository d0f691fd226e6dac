use chrono::{DateTime, Duration, Utc};

use crate::config::LockoutSettings;
use crate::identity::Identity;

/// Result of registering a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Counted { attempts: u32 },
    Locked { attempts: u32, until: DateTime<Utc> },
}

/// Failed-attempt counting and lock windows.
///
/// Expiry is lazy: a lock simply stops applying once `locked_until` passes. The
/// counter survives an expired lock, so the next failure locks again.
#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    max_attempts: u32,
    lock_duration: Duration,
}

impl LockoutPolicy {
    pub fn new(max_attempts: u32, lock_duration: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lock_duration,
        }
    }

    pub fn from_settings(settings: &LockoutSettings) -> Self {
        Self::new(settings.max_attempts, settings.lock_duration())
    }

    pub fn is_locked(&self, identity: &Identity, now: DateTime<Utc>) -> bool {
        identity.is_locked(now)
    }

    pub fn register_failure(&self, identity: &mut Identity, now: DateTime<Utc>) -> FailureOutcome {
        identity.failed_attempts = identity.failed_attempts.saturating_add(1);
        let attempts = identity.failed_attempts;

        if attempts >= self.max_attempts {
            let until = now + self.lock_duration;
            identity.locked_until = Some(until);
            FailureOutcome::Locked { attempts, until }
        } else {
            FailureOutcome::Counted { attempts }
        }
    }

    pub fn register_success(&self, identity: &mut Identity) {
        identity.failed_attempts = 0;
        identity.locked_until = None;
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::from_settings(&LockoutSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::fixtures::identity;
    use crate::roles::Role;

    #[test]
    fn locks_on_the_fifth_failure() {
        let policy = LockoutPolicy::default();
        let mut user = identity(1, Role::User, None);
        let now = Utc::now();

        for expected in 1..5 {
            assert_eq!(
                policy.register_failure(&mut user, now),
                FailureOutcome::Counted { attempts: expected }
            );
        }
        let outcome = policy.register_failure(&mut user, now);
        assert_eq!(
            outcome,
            FailureOutcome::Locked { attempts: 5, until: now + Duration::minutes(15) }
        );
        assert!(policy.is_locked(&user, now + Duration::minutes(14)));
        assert!(!policy.is_locked(&user, now + Duration::minutes(15)));
    }

    #[test]
    fn success_clears_counter_and_lock() {
        let policy = LockoutPolicy::new(2, Duration::minutes(1));
        let mut user = identity(1, Role::User, None);
        let now = Utc::now();
        policy.register_failure(&mut user, now);
        policy.register_failure(&mut user, now);
        assert!(user.locked_until.is_some());

        policy.register_success(&mut user);
        assert_eq!(user.failed_attempts, 0);
        assert_eq!(user.locked_until, None);
    }
}
