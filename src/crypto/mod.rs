//! Cryptographic functions for snapvault
//!
//! Provides streaming AES-256-GCM encryption with Argon2id key derivation
//! for backup artifacts at rest.

pub mod envelope;
pub mod key_derivation;
pub mod secure_memory;

pub use envelope::{
    decrypt_stream, encrypt_stream, EnvelopeHeader, EnvelopeReader, EnvelopeWriter, DEFAULT_CHUNK_SIZE,
};
pub use key_derivation::{derive_key, DerivedKey, KdfCosts, KeyDerivationParams};
pub use secure_memory::Passphrase;
