// Runtime configuration for the key-management core
// Every section has production-grade defaults; JSON documents may override any subset

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::algorithm::Algorithm;
use crate::crypto::kem::registry::ProviderKind;
use crate::negotiation::FallbackPolicy;

/// Minimum PBKDF2 cost accepted in production
pub const MIN_PRODUCTION_KDF_ITERATIONS: u32 = 100_000;

/// Minimum salt length for backup key derivation
pub const MIN_SALT_LENGTH: usize = 16;

/// Backup passwords shorter than this are always refused
pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub environment: Environment,
    pub providers: ProviderConfig,
    pub negotiation: NegotiationConfig,
    pub rotation: RotationConfig,
    pub backup: BackupConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Post-quantum backends to probe, most preferred first
    pub preference: Vec<ProviderKind>,
    /// RSA modulus size for new classical keys
    pub classical_key_bits: u16,
    /// Kyber level used inside new hybrid keys
    pub hybrid_kem_level: u16,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            preference: vec![ProviderKind::Kyber, ProviderKind::Software],
            classical_key_bits: 4096,
            hybrid_kem_level: 768,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    pub fallback: FallbackPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Rotate after this many messages under one key version
    pub max_messages: u64,
    /// Rotate once a key version is older than this
    pub max_key_age_secs: u64,
    pub rotate_on_membership_change: bool,
    /// Stamped on records as `expires_at`; `None` leaves records open-ended
    pub key_lifetime_secs: Option<u64>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_messages: 10_000,
            max_key_age_secs: 7 * 24 * 60 * 60,
            rotate_on_membership_change: true,
            key_lifetime_secs: Some(30 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub kdf_iterations: u32,
    pub salt_length: usize,
    pub min_password_length: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: 310_000,
            salt_length: 32,
            min_password_length: MIN_PASSWORD_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Algorithm exercised by the key-generation and integrity checks
    pub algorithm: Algorithm,
    pub slow_key_generation_ms: u64,
    pub slow_symmetric_ms: u64,
    pub slow_integrity_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Kem768,
            slow_key_generation_ms: 5_000,
            slow_symmetric_ms: 1_000,
            slow_integrity_ms: 2_000,
        }
    }
}

impl CoreConfig {
    /// Fast, permissive settings for tests and local development
    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            providers: ProviderConfig {
                preference: vec![
                    ProviderKind::Kyber,
                    ProviderKind::Software,
                    ProviderKind::Deterministic,
                ],
                classical_key_bits: 2048,
                hybrid_kem_level: 768,
            },
            backup: BackupConfig {
                kdf_iterations: 1_000,
                ..BackupConfig::default()
            },
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.preference.is_empty() {
            return Err(ConfigError::Invalid("providers.preference must not be empty".into()));
        }
        if !crate::crypto::kem::classical::RSA_LEVELS.contains(&self.providers.classical_key_bits) {
            return Err(ConfigError::Invalid(format!(
                "providers.classical_key_bits must be one of {:?}",
                crate::crypto::kem::classical::RSA_LEVELS
            )));
        }
        if crate::crypto::HybridScheme::for_kem_level(self.providers.hybrid_kem_level).is_err() {
            return Err(ConfigError::Invalid(
                "providers.hybrid_kem_level must be 768 or 1024".into(),
            ));
        }
        if self.backup.salt_length < MIN_SALT_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "backup.salt_length must be at least {}",
                MIN_SALT_LENGTH
            )));
        }
        if self.backup.min_password_length < MIN_PASSWORD_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "backup.min_password_length must be at least {}",
                MIN_PASSWORD_LENGTH
            )));
        }
        if self.backup.kdf_iterations == 0 {
            return Err(ConfigError::Invalid("backup.kdf_iterations must be positive".into()));
        }
        if self.rotation.max_messages == 0 || self.rotation.max_key_age_secs == 0 {
            return Err(ConfigError::Invalid("rotation thresholds must be positive".into()));
        }

        if self.environment == Environment::Production {
            if self.providers.preference.contains(&ProviderKind::Deterministic) {
                return Err(ConfigError::Invalid(
                    "the deterministic test provider cannot be enabled in production".into(),
                ));
            }
            if self.backup.kdf_iterations < MIN_PRODUCTION_KDF_ITERATIONS {
                return Err(ConfigError::Invalid(format!(
                    "backup.kdf_iterations must be at least {} in production",
                    MIN_PRODUCTION_KDF_ITERATIONS
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        CoreConfig::default().validate().unwrap();
        CoreConfig::development().validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CoreConfig::from_json(
            r#"{ "negotiation": { "fallback": "enforce_quantum_only" }, "rotation": { "max_messages": 50 } }"#,
        )
        .unwrap();

        assert_eq!(config.negotiation.fallback, FallbackPolicy::EnforceQuantumOnly);
        assert_eq!(config.rotation.max_messages, 50);
        assert_eq!(config.backup.kdf_iterations, BackupConfig::default().kdf_iterations);
        assert_eq!(config.environment, Environment::Production);
    }

    #[test]
    fn test_production_rejects_test_provider() {
        let err = CoreConfig::from_json(r#"{ "providers": { "preference": ["kyber", "deterministic"] } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        CoreConfig::from_json(
            r#"{ "environment": "development", "providers": { "preference": ["deterministic"] } }"#,
        )
        .unwrap();
    }

    #[test]
    fn test_production_rejects_cheap_kdf() {
        let err = CoreConfig::from_json(r#"{ "backup": { "kdf_iterations": 1000 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_short_salt_rejected() {
        let mut config = CoreConfig::development();
        config.backup.salt_length = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_password_minimum_rejected() {
        let err = CoreConfig::from_json(
            r#"{ "environment": "development", "backup": { "min_password_length": 1 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = CoreConfig::from_json(
            r#"{ "environment": "development", "backup": { "min_password_length": 12 } }"#,
        )
        .unwrap();
        assert_eq!(config.backup.min_password_length, 12);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(CoreConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }
}
