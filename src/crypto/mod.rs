// Cryptography module for polykey
// Symmetric payload encryption, pluggable key establishment, hybrid combination and key wrapping

pub mod encoding;
pub mod hybrid;
pub mod kdf;
pub mod kem;
pub mod random;
pub mod symmetric;
pub mod timing;
pub mod wrap;

pub use hybrid::{HybridCombiner, HybridKeyPair, HybridScheme};
pub use kem::{
    registry::{ProviderKind, ProviderSet},
    Encapsulation, KemBackend, KemKeyPair, KemProvider, SharedSecret,
};
pub use symmetric::{decrypt, encrypt_file, encrypt_message, EncryptedPayload, SymmetricKey};
pub use wrap::DeviceKeyPair;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Integrity check failed")]
    IntegrityMismatch,

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Security level {level} is not supported by {provider}")]
    UnsupportedSecurityLevel { provider: &'static str, level: u16 },

    #[error("No key provider available: {0}")]
    ProviderUnavailable(String),

    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("No algorithm is supported by every participant")]
    NoCompatibleAlgorithm,

    #[error("Password must be at least {min_length} characters long")]
    WeakPassword { min_length: usize },

    #[error("Backup could not be decrypted")]
    DecryptionFailed,

    #[error("Encryption failed: {0}")]
    EncryptionError(String),

    #[error("Key exchange failed: {0}")]
    KeyExchangeError(String),

    #[error("Fingerprint does not match the public key of device {0}")]
    FingerprintMismatch(String),

    #[error("Conversation {0} has no active key version")]
    NotInitialized(String),

    #[error("Worker task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
