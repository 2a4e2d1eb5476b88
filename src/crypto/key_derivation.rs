//! Key derivation using Argon2id
//!
//! Every backup run derives a fresh AES-256 key from the passphrase and a
//! newly generated random salt. The salt and cost parameters are stored in
//! the artifact header so decryption needs nothing but the passphrase.

use aes_gcm::aead::{rand_core::RngCore, OsRng};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{SnapvaultError, SnapvaultResult};

use super::Passphrase;

/// Identifier written into artifact headers
pub const KDF_ALGORITHM: &str = "argon2id-v19";

/// Length of the derived key (AES-256)
pub const KEY_LEN: usize = 32;

/// Length of the random salt
pub const SALT_LEN: usize = 16;

/// Default memory cost in KiB (64 MiB)
pub const DEFAULT_MEMORY_COST: u32 = 65536;

/// Default time cost (Argon2 iterations)
pub const DEFAULT_TIME_COST: u32 = 3;

/// Default parallelism degree
pub const DEFAULT_PARALLELISM: u32 = 4;

// Upper bounds accepted from artifact headers (1 GiB, 64 passes, 64 lanes),
// checked before any key derivation
pub(crate) const MAX_MEMORY_COST: u32 = 1024 * 1024;
const MAX_TIME_COST: u32 = 64;
const MAX_PARALLELISM: u32 = 64;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfCosts {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    /// Parallelism degree
    pub parallelism: u32,
}

impl Default for KdfCosts {
    fn default() -> Self {
        Self {
            memory_cost: DEFAULT_MEMORY_COST,
            time_cost: DEFAULT_TIME_COST,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl KdfCosts {
    /// Create costs with specific values
    pub fn new(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            memory_cost,
            time_cost,
            parallelism,
        }
    }

    /// Check the costs are accepted by Argon2 and within snapvault's bounds
    pub fn validate(&self) -> SnapvaultResult<()> {
        if self.time_cost == 0 || self.time_cost > MAX_TIME_COST {
            return Err(SnapvaultError::Config(format!(
                "KDF time cost must be between 1 and {}, got {}",
                MAX_TIME_COST, self.time_cost
            )));
        }
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(SnapvaultError::Config(format!(
                "KDF parallelism must be between 1 and {}, got {}",
                MAX_PARALLELISM, self.parallelism
            )));
        }
        if self.memory_cost < 8 * self.parallelism || self.memory_cost > MAX_MEMORY_COST {
            return Err(SnapvaultError::Config(format!(
                "KDF memory cost must be between {} and {} KiB, got {}",
                8 * self.parallelism,
                MAX_MEMORY_COST,
                self.memory_cost
            )));
        }
        Ok(())
    }
}

/// Parameters for key derivation, as embedded in an artifact header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivationParams {
    /// Algorithm identifier
    pub algorithm: String,
    /// Salt for key derivation (base64 encoded)
    pub salt: String,
    /// Cost parameters
    #[serde(flatten)]
    pub costs: KdfCosts,
}

impl KeyDerivationParams {
    /// Create new params with a fresh random salt
    pub fn generate(costs: KdfCosts) -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        Self {
            algorithm: KDF_ALGORITHM.to_string(),
            salt: STANDARD.encode(salt),
            costs,
        }
    }

    /// Decode the salt from base64
    pub fn salt_bytes(&self) -> SnapvaultResult<Vec<u8>> {
        let salt = STANDARD
            .decode(&self.salt)
            .map_err(|e| SnapvaultError::Config(format!("Invalid salt encoding: {}", e)))?;
        if salt.len() < SALT_LEN {
            return Err(SnapvaultError::Config(format!(
                "Salt too short: expected at least {} bytes, got {}",
                SALT_LEN,
                salt.len()
            )));
        }
        Ok(salt)
    }

    /// Check algorithm and cost parameters
    pub fn validate(&self) -> SnapvaultResult<()> {
        if self.algorithm != KDF_ALGORITHM {
            return Err(SnapvaultError::Config(format!(
                "Unsupported key derivation algorithm: {}",
                self.algorithm
            )));
        }
        self.costs.validate()
    }
}

/// A derived encryption key, wiped on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_LEN],
}

impl DerivedKey {
    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

/// Derive an encryption key from a passphrase
pub fn derive_key(passphrase: &Passphrase, params: &KeyDerivationParams) -> SnapvaultResult<DerivedKey> {
    params.validate()?;
    let salt = params.salt_bytes()?;

    let argon2_params = Params::new(
        params.costs.memory_cost,
        params.costs.time_cost,
        params.costs.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| SnapvaultError::Config(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = DerivedKey { key: [0u8; KEY_LEN] };
    argon2
        .hash_password_into(passphrase.as_bytes(), &salt, &mut key.key)
        .map_err(|e| SnapvaultError::Config(format!("Key derivation failed: {}", e)))?;

    Ok(key)
}
