//! Password hashing and verification
//!
//! Hashes are Argon2id PHC strings (`$argon2id$v=19$m=..,t=..,p=..$salt$hash`).
//! The encoded string carries the algorithm, version and every cost
//! parameter, so verification never needs the parameters used at hashing
//! time. Comparison of the derived key is constant-time.

use anyhow::Result;
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::{RngCore, rngs::OsRng};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error};

/// Shortest salt accepted by the PHC encoding
const MIN_SALT_LENGTH: usize = 8;
/// Longest salt that fits the PHC encoding (64 base64 characters)
const MAX_SALT_LENGTH: usize = 48;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes over memory
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
    /// Salt length in bytes
    pub salt_length: usize,
    /// Derived key length in bytes
    pub key_length: usize,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024, // 64 MiB
            iterations: 3,
            parallelism: 4,
            salt_length: 16,
            key_length: 32,
        }
    }
}

impl Argon2Params {
    /// Create Argon2 parameters from environment variables
    ///
    /// # Environment Variables
    /// - `ARGON2_MEMORY_KIB`: Memory cost in KiB (default: 65536)
    /// - `ARGON2_ITERATIONS`: Iteration count (default: 3)
    /// - `ARGON2_PARALLELISM`: Lanes (default: 4)
    /// - `ARGON2_SALT_LENGTH`: Salt length in bytes (default: 16)
    /// - `ARGON2_KEY_LENGTH`: Output length in bytes (default: 32)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let params = Self {
            memory_kib: env_or("ARGON2_MEMORY_KIB", defaults.memory_kib),
            iterations: env_or("ARGON2_ITERATIONS", defaults.iterations),
            parallelism: env_or("ARGON2_PARALLELISM", defaults.parallelism),
            salt_length: env_or("ARGON2_SALT_LENGTH", defaults.salt_length),
            key_length: env_or("ARGON2_KEY_LENGTH", defaults.key_length),
        };

        // Fail at startup on unusable parameters
        params.argon2()?;
        Ok(params)
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        if !(MIN_SALT_LENGTH..=MAX_SALT_LENGTH).contains(&self.salt_length) {
            anyhow::bail!(
                "salt length must be between {} and {} bytes, got {}",
                MIN_SALT_LENGTH,
                MAX_SALT_LENGTH,
                self.salt_length
            );
        }

        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(self.key_length),
        )
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 parameters: {}", e))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Memory-hard password hasher
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Argon2Params,
    // Hash of a random password, verified against when the account is unknown
    // so that both login failure paths cost the same.
    decoy: Arc<OnceLock<Option<String>>>,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(Argon2Params::default())
    }
}

impl PasswordHasher {
    pub fn new(params: Argon2Params) -> Self {
        Self {
            params,
            decoy: Arc::new(OnceLock::new()),
        }
    }

    pub fn params(&self) -> &Argon2Params {
        &self.params
    }

    /// Hash a password with the configured parameters and a fresh random salt
    pub fn hash(&self, password: &str) -> Result<String> {
        self.hash_with(password, &self.params)
    }

    /// Hash a password with explicit parameters
    pub fn hash_with(&self, password: &str, params: &Argon2Params) -> Result<String> {
        let argon2 = params.argon2()?;

        let mut salt_bytes = vec![0u8; params.salt_length];
        OsRng.fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to encode salt: {}", e))?;

        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

        Ok(hash.to_string())
    }

    /// Verify a password against an encoded hash
    ///
    /// Any decode failure (malformed string, other algorithm, other Argon2
    /// version, out-of-range parameters) is reported as a mismatch.
    pub fn verify(&self, password: &str, encoded_hash: &str) -> bool {
        let parsed = match PasswordHash::new(encoded_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Rejecting malformed password hash: {}", e);
                return false;
            }
        };

        if parsed.algorithm != Algorithm::Argon2id.ident() {
            debug!("Rejecting password hash with algorithm {}", parsed.algorithm);
            return false;
        }
        if parsed.version != Some(Version::V0x13.into()) {
            debug!("Rejecting password hash with unsupported version");
            return false;
        }

        // Argon2 re-reads m/t/p and the output length from the parsed hash and
        // compares the recomputed output in constant time.
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Burn the same work as a real verification without any account behind it
    pub fn verify_decoy(&self, password: &str) {
        let decoy = self.decoy.get_or_init(|| {
            let mut random = [0u8; 32];
            OsRng.fill_bytes(&mut random);
            let throwaway: String = random.iter().map(|b| format!("{:02x}", b)).collect();
            match self.hash(&throwaway) {
                Ok(hash) => Some(hash),
                Err(e) => {
                    error!("Failed to prepare decoy password hash: {}", e);
                    None
                }
            }
        });

        if let Some(decoy) = decoy {
            let _ = self.verify(password, decoy);
        }
    }

    /// [`hash`](Self::hash) on the blocking thread pool
    pub async fn hash_blocking(&self, password: &str) -> Result<String> {
        let hasher = self.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&password)).await?
    }

    /// [`verify`](Self::verify) on the blocking thread pool
    pub async fn verify_blocking(&self, password: &str, encoded_hash: &str) -> Result<bool> {
        let hasher = self.clone();
        let password = password.to_owned();
        let encoded_hash = encoded_hash.to_owned();
        let matches =
            tokio::task::spawn_blocking(move || hasher.verify(&password, &encoded_hash)).await?;
        Ok(matches)
    }

    /// [`verify_decoy`](Self::verify_decoy) on the blocking thread pool
    pub async fn verify_decoy_blocking(&self, password: &str) -> Result<()> {
        let hasher = self.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify_decoy(&password)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_hasher() -> PasswordHasher {
        PasswordHasher::new(Argon2Params {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
            salt_length: 16,
            key_length: 32,
        })
    }

    #[test]
    fn test_hash_round_trip() {
        let hasher = cheap_hasher();
        let hash = hasher.hash("Passw0rd!").unwrap();

        assert!(hasher.verify("Passw0rd!", &hash));
        assert!(!hasher.verify("Passw0rd?", &hash));
        assert!(!hasher.verify("", &hash));
    }

    #[test]
    fn test_hash_uses_fresh_salt() {
        let hasher = cheap_hasher();
        let first = hasher.hash("Passw0rd!").unwrap();
        let second = hasher.hash("Passw0rd!").unwrap();

        assert_ne!(first, second);
        assert!(hasher.verify("Passw0rd!", &first));
        assert!(hasher.verify("Passw0rd!", &second));
    }

    #[test]
    fn test_hash_is_self_describing() {
        let hasher = cheap_hasher();
        let hash = hasher.hash("secret-value").unwrap();

        assert!(hash.starts_with("$argon2id$v=19$m=1024,t=1,p=1$"));
        assert!(!hash.contains("secret-value"));
    }

    #[test]
    fn test_verify_uses_parameters_embedded_in_hash() {
        let hasher = cheap_hasher();
        let other_params = Argon2Params {
            memory_kib: 2048,
            iterations: 2,
            parallelism: 2,
            salt_length: 24,
            key_length: 48,
        };
        let hash = hasher.hash_with("Passw0rd!", &other_params).unwrap();

        assert!(hash.contains("m=2048,t=2,p=2"));
        assert!(hasher.verify("Passw0rd!", &hash));
    }

    #[test]
    fn test_malformed_hashes_fail_verification() {
        let hasher = cheap_hasher();
        let valid = hasher.hash("Passw0rd!").unwrap();

        assert!(!hasher.verify("Passw0rd!", ""));
        assert!(!hasher.verify("Passw0rd!", "not-a-hash"));
        assert!(!hasher.verify("Passw0rd!", "$argon2id$v=19$m=1024,t=1,p=1$$"));
        assert!(!hasher.verify("Passw0rd!", &valid.replace("v=19", "v=16")));
        assert!(!hasher.verify("Passw0rd!", &valid.replace("$argon2id$", "$argon2i$")));
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        let hasher = cheap_hasher();
        let tiny_salt = Argon2Params {
            salt_length: 4,
            ..*hasher.params()
        };
        assert!(hasher.hash_with("Passw0rd!", &tiny_salt).is_err());

        let no_memory = Argon2Params {
            memory_kib: 1,
            ..*hasher.params()
        };
        assert!(hasher.hash_with("Passw0rd!", &no_memory).is_err());
    }

    #[test]
    fn test_decoy_verification_does_not_panic() {
        let hasher = cheap_hasher();
        hasher.verify_decoy("anything");
        hasher.verify_decoy("anything else");
    }

    #[tokio::test]
    async fn test_blocking_helpers() {
        let hasher = cheap_hasher();
        let hash = hasher.hash_blocking("Passw0rd!").await.unwrap();

        assert!(hasher.verify_blocking("Passw0rd!", &hash).await.unwrap());
        assert!(!hasher.verify_blocking("wrong", &hash).await.unwrap());
    }
}
