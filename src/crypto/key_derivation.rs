//! Argon2id key derivation
//!
//! The salt and costs travel in each backup's metadata. They are read from
//! disk, so they are bounded before any memory is committed to hashing.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{RestoreError, RestoreResult};

/// Largest memory cost accepted from metadata, in KiB (1 GiB)
pub const MAX_MEMORY_COST: u32 = 1 << 20;
/// Largest iteration count accepted from metadata
pub const MAX_TIME_COST: u32 = 64;
/// Shortest salt accepted
pub const MIN_SALT_LEN: usize = 8;

/// Argon2id parameters recorded when the backup was encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivationParams {
    pub salt: String,
    /// KiB
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self {
            salt: String::new(),
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KeyDerivationParams {
    pub fn with_values(salt: String, memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            salt,
            memory_cost,
            time_cost,
            parallelism,
        }
    }

    /// Reject parameters outside what a backup could sensibly carry
    pub fn validate(&self) -> RestoreResult<()> {
        if self.salt.len() < MIN_SALT_LEN {
            return Err(RestoreError::Configuration(format!(
                "Salt must be at least {} bytes",
                MIN_SALT_LEN
            )));
        }
        if self.memory_cost > MAX_MEMORY_COST {
            return Err(RestoreError::Configuration(format!(
                "Memory cost {} KiB exceeds the limit of {} KiB",
                self.memory_cost, MAX_MEMORY_COST
            )));
        }
        if self.time_cost == 0 || self.time_cost > MAX_TIME_COST {
            return Err(RestoreError::Configuration(format!(
                "Time cost {} is out of range",
                self.time_cost
            )));
        }
        Ok(())
    }

    fn argon2(&self) -> RestoreResult<Argon2<'static>> {
        let params = Params::new(self.memory_cost, self.time_cost, self.parallelism, Some(32))
            .map_err(|e| RestoreError::Configuration(format!("Invalid Argon2 parameters: {}", e)))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// A 256-bit key, wiped when dropped
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; 32],
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

/// Derive the backup key from a passphrase
pub fn derive_key(passphrase: &str, params: &KeyDerivationParams) -> RestoreResult<DerivedKey> {
    params.validate()?;
    let mut key = DerivedKey { key: [0u8; 32] };
    params
        .argon2()?
        .hash_password_into(passphrase.as_bytes(), params.salt.as_bytes(), &mut key.key)
        .map_err(|e| RestoreError::Configuration(format!("Key derivation failed: {}", e)))?;
    Ok(key)
}

#[cfg(test)]
pub(crate) fn test_params() -> KeyDerivationParams {
    use argon2::password_hash::{rand_core::OsRng, SaltString};

    let salt = SaltString::generate(&mut OsRng);
    KeyDerivationParams::with_values(salt.to_string(), 1024, 1, 1)
}
