//! Password hashing and verification using Argon2id

use argon2::{Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier, Version};
use password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use thiserror::Error;

/// Lowest accepted time cost.
pub const MIN_COST: u32 = 1;
/// Highest accepted time cost.
pub const MAX_COST: u32 = 10;
pub const MIN_MEMORY_KIB: u32 = 1024;
pub const MAX_MEMORY_KIB: u32 = 1024 * 1024;

const PARALLELISM: u32 = 1;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password cost {0} out of range [{MIN_COST}, {MAX_COST}]")]
    CostOutOfRange(u32),

    #[error("password memory {0} KiB out of range [{MIN_MEMORY_KIB}, {MAX_MEMORY_KIB}]")]
    MemoryOutOfRange(u32),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Cost-parameterized one-way password hasher.
///
/// Hashes are PHC strings, so every stored hash embeds its own parameters and
/// stays verifiable after the configured cost changes.
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    // Compared against when the user does not exist, so both login failure
    // paths pay for one verification.
    dummy: String,
}

impl PasswordHasher {
    pub fn new(cost: u32, memory_kib: u32) -> Result<Self, PasswordError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(PasswordError::CostOutOfRange(cost));
        }
        if !(MIN_MEMORY_KIB..=MAX_MEMORY_KIB).contains(&memory_kib) {
            return Err(PasswordError::MemoryOutOfRange(memory_kib));
        }

        let params = Params::new(memory_kib, cost, PARALLELISM, None)
            .map_err(|e| PasswordError::Hash(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = SaltString::generate(&mut OsRng);
        let dummy = argon2
            .hash_password(b"charon-dummy-password", &salt)
            .map_err(|e| PasswordError::Hash(e.to_string()))?
            .to_string();

        Ok(Self { argon2, dummy })
    }

    /// Hash a password
    pub fn hash(&self, plain: &[u8]) -> Result<Vec<u8>, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self.argon2.hash_password(plain, &salt).map_err(|e| {
            tracing::error!("Failed to hash password: {:?}", e);
            PasswordError::Hash(e.to_string())
        })?;

        Ok(hash.to_string().into_bytes())
    }

    /// Reports whether `candidate` matches the stored hash.
    ///
    /// Malformed hashes never match.
    pub fn compare(&self, hash: &[u8], candidate: &[u8]) -> bool {
        let Ok(encoded) = std::str::from_utf8(hash) else {
            return false;
        };
        let parsed = match PasswordHash::new(encoded) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!("Failed to parse password hash: {:?}", e);
                return false;
            }
        };

        self.argon2.verify_password(candidate, &parsed).is_ok()
    }

    /// Accepts a pre-hashed password if it is a well-formed PHC string.
    pub fn parse_hash(encoded: &str) -> Result<Vec<u8>, PasswordError> {
        PasswordHash::new(encoded).map_err(|e| PasswordError::Hash(e.to_string()))?;
        Ok(encoded.as_bytes().to_vec())
    }

    /// Burns one verification against a constant hash. Always false.
    pub fn compare_dummy(&self, candidate: &[u8]) -> bool {
        let _ = self.compare(self.dummy.as_bytes(), candidate);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(MIN_COST, MIN_MEMORY_KIB).unwrap()
    }

    #[test]
    fn test_hash_and_compare() {
        let hasher = hasher();
        let hash = hasher.hash(b"TestPassword123!").unwrap();

        assert!(hasher.compare(&hash, b"TestPassword123!"));
        assert!(!hasher.compare(&hash, b"WrongPassword"));
    }

    #[test]
    fn test_hash_embeds_cost() {
        let hasher = PasswordHasher::new(2, MIN_MEMORY_KIB).unwrap();
        let hash = String::from_utf8(hasher.hash(b"secret").unwrap()).unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("t=2"));

        // a hasher with another cost still verifies it
        assert!(PasswordHasher::new(1, MIN_MEMORY_KIB).unwrap().compare(hash.as_bytes(), b"secret"));
    }

    #[test]
    fn test_hash_is_different_each_time() {
        let hasher = hasher();
        let hash1 = hasher.hash(b"secret").unwrap();
        let hash2 = hasher.hash(b"secret").unwrap();

        assert_ne!(hash1, hash2);
        assert!(hasher.compare(&hash1, b"secret"));
        assert!(hasher.compare(&hash2, b"secret"));
    }

    #[test]
    fn test_cost_out_of_range_rejected() {
        assert!(matches!(
            PasswordHasher::new(0, MIN_MEMORY_KIB),
            Err(PasswordError::CostOutOfRange(0))
        ));
        assert!(matches!(
            PasswordHasher::new(MAX_COST + 1, MIN_MEMORY_KIB),
            Err(PasswordError::CostOutOfRange(_))
        ));
        assert!(matches!(
            PasswordHasher::new(MIN_COST, 8),
            Err(PasswordError::MemoryOutOfRange(8))
        ));
    }

    #[test]
    fn test_compare_with_malformed_hash() {
        let hasher = hasher();
        assert!(!hasher.compare(b"", b"secret"));
        assert!(!hasher.compare(b"invalid_hash", b"secret"));
        assert!(!hasher.compare(b"$argon2id$v=19$invalid", b"secret"));
        assert!(!hasher.compare(&[0xff, 0xfe], b"secret"));
    }

    #[test]
    fn test_parse_hash() {
        let hash = String::from_utf8(hasher().hash(b"secret").unwrap()).unwrap();
        assert_eq!(PasswordHasher::parse_hash(&hash).unwrap(), hash.as_bytes());
        assert!(PasswordHasher::parse_hash("plaintext").is_err());
    }

    #[test]
    fn test_compare_dummy_never_matches() {
        let hasher = hasher();
        assert!(!hasher.compare_dummy(b"charon-dummy-password"));
        assert!(!hasher.compare_dummy(b""));
    }
}
