//! Credential vault: Argon2id hashing, strength policy and reuse checks.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use rand::RngCore;

use archive_core::{ArchiveError, ArchiveResult};

use crate::config::{HashingSettings, PasswordSettings};
use crate::store::PasswordHistoryEntry;

pub struct CredentialVault {
    argon2: Argon2<'static>,
    policy: PasswordSettings,
    /// Verified against when the identifier is unknown, so both paths cost one hash.
    decoy_hash: String,
}

impl CredentialVault {
    pub fn new(hashing: &HashingSettings, policy: PasswordSettings) -> ArchiveResult<Self> {
        let params = Params::new(hashing.memory_kib, hashing.iterations, hashing.parallelism, None)
            .map_err(|e| ArchiveError::validation(format!("invalid hashing parameters: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut vault = Self {
            argon2,
            policy,
            decoy_hash: String::new(),
        };
        vault.decoy_hash = vault.hash(&crate::tokens::generate_token())?;
        Ok(vault)
    }

    pub fn policy(&self) -> &PasswordSettings {
        &self.policy
    }

    /// Hash a secret into a PHC string with a fresh random salt.
    pub fn hash(&self, secret: &str) -> ArchiveResult<String> {
        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| ArchiveError::internal(format!("salt encoding failed: {e}")))?;

        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ArchiveError::internal(format!("password hashing failed: {e}")))
    }

    /// Constant-time verification. Malformed hashes never verify.
    pub fn verify(&self, secret: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self.argon2.verify_password(secret.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }

    /// Spend one verification on the decoy hash.
    pub fn verify_decoy(&self, secret: &str) {
        let _ = self.verify(secret, &self.decoy_hash);
    }

    pub fn check_strength(&self, secret: &str) -> ArchiveResult<()> {
        let mut problems = Vec::new();

        if secret.chars().count() < self.policy.min_length {
            problems.push(format!("must be at least {} characters", self.policy.min_length));
        }
        if self.policy.require_mixed_case {
            if !secret.chars().any(char::is_uppercase) {
                problems.push("must contain an uppercase letter".to_string());
            }
            if !secret.chars().any(char::is_lowercase) {
                problems.push("must contain a lowercase letter".to_string());
            }
        }
        if self.policy.require_digit && !secret.chars().any(|c| c.is_ascii_digit()) {
            problems.push("must contain a digit".to_string());
        }
        let lowered = secret.to_lowercase();
        if self.policy.deny_list.iter().any(|denied| denied.to_lowercase() == lowered) {
            problems.push("is too common".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ArchiveError::weak_password(problems.join("; ")))
        }
    }

    /// Reject the current secret and anything still in the history window.
    pub fn ensure_not_reused(
        &self,
        secret: &str,
        current_hash: &str,
        history: &[PasswordHistoryEntry],
    ) -> ArchiveResult<()> {
        if self.verify(secret, current_hash) {
            return Err(ArchiveError::PasswordReused);
        }
        let reused = history
            .iter()
            .take(self.policy.history_depth)
            .any(|entry| self.verify(secret, &entry.password_hash));
        if reused {
            return Err(ArchiveError::PasswordReused);
        }
        Ok(())
    }

    pub fn is_expired(&self, changed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - changed_at > self.policy.max_age()
    }
}

impl core::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
