// Conversation key distribution
// Per-device records, version bookkeeping, rotation triggers and concurrent bulk operations

pub mod bulk;
pub mod manager;
pub mod record;
pub mod rotation;
pub mod timeline;

pub use bulk::{bulk_decrypt, encrypt_for_participants, BulkDecryptReport, BulkWrapReport};
pub use manager::{KeyDistribution, KeyDistributionManager, KeyRotation, INITIAL_KEY_VERSION};
pub use record::EncryptionKeyRecord;
pub use rotation::{KeyUsage, RotationPolicy, RotationReason};
pub use timeline::KeyTimeline;
