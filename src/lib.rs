// polykey library - multi-device conversation key management
// Exposes modules for benchmarks and integration testing

pub mod algorithm;
pub mod backup;
pub mod config;
pub mod crypto;
pub mod device;
pub mod distribution;
pub mod health;
pub mod negotiation;

pub use algorithm::{Algorithm, PRIORITY_ORDER};
pub use backup::{BackupBlob, BackupManager, KeyMaterial};
pub use config::{ConfigError, CoreConfig, Environment};
pub use crypto::{CryptoError, EncryptedPayload, ProviderSet, SymmetricKey};
pub use device::DeviceCapability;
pub use distribution::{
    EncryptionKeyRecord, KeyDistribution, KeyDistributionManager, KeyRotation, KeyTimeline,
    KeyUsage, RotationPolicy, RotationReason,
};
pub use health::{HealthMetrics, HealthReport, HealthStatus, HealthValidator};
pub use negotiation::{AlgorithmNegotiator, FallbackPolicy, NegotiationResult};
