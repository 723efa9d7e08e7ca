// Conversation key lifecycle: setup, rotation and redistribution
// Records are produced for the caller to persist; nothing here performs I/O

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::algorithm::Algorithm;
use crate::config::CoreConfig;
use crate::crypto::{CryptoError, ProviderSet, SymmetricKey};
use crate::device::DeviceCapability;
use crate::negotiation::{AlgorithmNegotiator, NegotiationResult};

use super::bulk::{self, BulkDecryptReport};
use super::record::EncryptionKeyRecord;
use super::rotation::{RotationPolicy, RotationReason};
use super::timeline::KeyTimeline;

/// First version issued for a conversation
pub const INITIAL_KEY_VERSION: u32 = 1;

/// Records produced for one key version
#[derive(Debug, Clone)]
pub struct KeyDistribution {
    pub conversation_id: String,
    pub key_version: u32,
    pub algorithm: Algorithm,
    pub negotiation: NegotiationResult,
    /// One active record per successfully wrapped device, in input order
    pub records: Vec<EncryptionKeyRecord>,
    /// Devices that could not be served, keyed by device id
    pub errors: BTreeMap<String, CryptoError>,
    pub timed_out: Vec<String>,
}

impl KeyDistribution {
    /// Every requested device received a record
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.timed_out.is_empty()
    }

    /// Device ids to retry with [`KeyDistributionManager::redistribute`]
    pub fn failed_devices(&self) -> Vec<String> {
        self.errors
            .keys()
            .chain(self.timed_out.iter())
            .cloned()
            .collect()
    }
}

/// A new version plus the retired copies of the previous one
#[derive(Debug, Clone)]
pub struct KeyRotation {
    pub reason: RotationReason,
    pub previous_version: u32,
    pub distribution: KeyDistribution,
    pub deactivated: Vec<EncryptionKeyRecord>,
}

pub struct KeyDistributionManager {
    providers: Arc<ProviderSet>,
    negotiator: AlgorithmNegotiator,
    rotation: RotationPolicy,
    key_lifetime: Option<Duration>,
}

impl KeyDistributionManager {
    pub fn new(providers: Arc<ProviderSet>, config: &CoreConfig) -> Self {
        let key_lifetime = config.rotation.key_lifetime_secs.map(|secs| {
            let secs = i64::try_from(secs).unwrap_or(i64::MAX);
            Duration::seconds(secs.min(i64::MAX / 1_000))
        });

        Self {
            providers,
            negotiator: AlgorithmNegotiator::new(config.negotiation.fallback),
            rotation: RotationPolicy::new(&config.rotation),
            key_lifetime,
        }
    }

    /// Probe providers from `config` and build a manager on top of them
    pub fn from_config(config: &CoreConfig) -> Result<Self, CryptoError> {
        let providers = ProviderSet::probe(config.environment, &config.providers)?;
        Ok(Self::new(Arc::new(providers), config))
    }

    pub fn providers(&self) -> &Arc<ProviderSet> {
        &self.providers
    }

    pub fn rotation_policy(&self) -> &RotationPolicy {
        &self.rotation
    }

    /// Issue version 1 of a conversation key for `devices`
    pub async fn setup_conversation(
        &self,
        conversation_id: &str,
        created_by_device_id: &str,
        devices: &[DeviceCapability],
        preferred: Option<Algorithm>,
        deadline: Option<Instant>,
    ) -> Result<KeyDistribution, CryptoError> {
        if devices.is_empty() {
            return Err(CryptoError::MalformedInput(format!(
                "conversation {} has no devices",
                conversation_id
            )));
        }

        let distribution = self
            .issue_version(
                conversation_id,
                created_by_device_id,
                INITIAL_KEY_VERSION,
                devices,
                preferred,
                deadline,
            )
            .await?;

        info!(
            conversation = conversation_id,
            algorithm = %distribution.algorithm,
            devices = distribution.records.len(),
            failed = distribution.errors.len() + distribution.timed_out.len(),
            "conversation key established"
        );
        Ok(distribution)
    }

    /// Issue the next version and retire every active record in `previous`
    pub async fn rotate(
        &self,
        previous: &[EncryptionKeyRecord],
        created_by_device_id: &str,
        devices: &[DeviceCapability],
        preferred: Option<Algorithm>,
        reason: RotationReason,
        deadline: Option<Instant>,
    ) -> Result<KeyRotation, CryptoError> {
        let conversation_id = single_conversation(previous)?;
        let timeline = KeyTimeline::new(conversation_id.as_str(), previous);
        let previous_version = timeline.current_version().ok_or_else(|| {
            CryptoError::NotInitialized(format!("conversation {} has no active key", conversation_id))
        })?;
        if devices.is_empty() {
            return Err(CryptoError::MalformedInput(format!(
                "conversation {} has no devices",
                conversation_id
            )));
        }

        // Versions only grow, even past inactive ones
        let next_version = timeline
            .latest_version()
            .unwrap_or(previous_version)
            .checked_add(1)
            .ok_or_else(|| CryptoError::MalformedInput("key version overflow".to_string()))?;

        let distribution = self
            .issue_version(
                &conversation_id,
                created_by_device_id,
                next_version,
                devices,
                preferred,
                deadline,
            )
            .await?;

        let deactivated: Vec<EncryptionKeyRecord> = previous
            .iter()
            .filter(|r| r.conversation_id == conversation_id && r.is_active)
            .map(EncryptionKeyRecord::deactivated)
            .collect();

        info!(
            conversation = %conversation_id,
            reason = %reason,
            from = previous_version,
            to = next_version,
            algorithm = %distribution.algorithm,
            retired = deactivated.len(),
            "conversation key rotated"
        );

        Ok(KeyRotation {
            reason,
            previous_version,
            distribution,
            deactivated,
        })
    }

    /// Wrap the current version's key for additional or previously failed devices
    ///
    /// The key is opened from `own_device_id`'s active record; the version does not change.
    /// Devices already holding an active record at the current version are skipped.
    pub async fn redistribute(
        &self,
        current: &[EncryptionKeyRecord],
        own_device_id: &str,
        own_private_key: &str,
        devices: &[DeviceCapability],
        deadline: Option<Instant>,
    ) -> Result<KeyDistribution, CryptoError> {
        let conversation_id = single_conversation(current)?;
        let timeline = KeyTimeline::new(conversation_id.as_str(), current);
        let version = timeline.current_version().ok_or_else(|| {
            CryptoError::NotInitialized(format!("conversation {} has no active key", conversation_id))
        })?;
        let own = timeline
            .record_for(own_device_id, version)
            .filter(|r| r.is_active)
            .ok_or_else(|| {
                CryptoError::NotInitialized(format!(
                    "device {} holds no active record at version {}",
                    own_device_id, version
                ))
            })?;

        let key = self.open_record(own, own_private_key)?;
        let algorithm = own.algorithm;

        let mut errors = BTreeMap::new();
        let targets: Vec<DeviceCapability> = devices
            .iter()
            .filter(|device| {
                let served = timeline
                    .record_for(&device.device_id, version)
                    .map_or(false, |r| r.is_active);
                if served {
                    debug!(device = %device.device_id, version, "device already holds the current key");
                }
                !served
            })
            .filter(|device| {
                let supported = device.capabilities().contains(&algorithm);
                if !supported {
                    errors.insert(device.device_id.clone(), CryptoError::NoCompatibleAlgorithm);
                }
                supported
            })
            .cloned()
            .collect();

        let negotiation = NegotiationResult {
            algorithm,
            participant_count: targets.len(),
            fell_back: false,
        };

        let mut distribution = self
            .distribute(&conversation_id, own_device_id, version, negotiation, &key, &targets, deadline)
            .await;
        distribution.errors.extend(errors);

        info!(
            conversation = %conversation_id,
            version,
            devices = distribution.records.len(),
            failed = distribution.errors.len() + distribution.timed_out.len(),
            "conversation key redistributed"
        );
        Ok(distribution)
    }

    /// Unwrap a record's conversation key with the device's private key
    pub fn open_record(
        &self,
        record: &EncryptionKeyRecord,
        private_key: &str,
    ) -> Result<SymmetricKey, CryptoError> {
        self.providers
            .unwrap_key(record.algorithm, &record.encrypted_key, private_key)
    }

    /// Decrypt many payloads under one opened key
    pub async fn bulk_decrypt(
        &self,
        key: &SymmetricKey,
        payloads: Vec<(String, String)>,
        deadline: Option<Instant>,
    ) -> BulkDecryptReport {
        bulk::bulk_decrypt(key, payloads, deadline).await
    }

    async fn issue_version(
        &self,
        conversation_id: &str,
        created_by_device_id: &str,
        version: u32,
        devices: &[DeviceCapability],
        preferred: Option<Algorithm>,
        deadline: Option<Instant>,
    ) -> Result<KeyDistribution, CryptoError> {
        let negotiation = self.negotiator.negotiate_devices(devices, preferred)?;
        if negotiation.fell_back {
            warn!(conversation = conversation_id, "participants share no algorithm, using classical");
        }

        let key = SymmetricKey::generate()?;
        Ok(self
            .distribute(
                conversation_id,
                created_by_device_id,
                version,
                negotiation,
                &key,
                devices,
                deadline,
            )
            .await)
    }

    /// Verify fingerprints, wrap for the remaining devices and build their records
    #[allow(clippy::too_many_arguments)]
    async fn distribute(
        &self,
        conversation_id: &str,
        created_by_device_id: &str,
        version: u32,
        negotiation: NegotiationResult,
        key: &SymmetricKey,
        devices: &[DeviceCapability],
        deadline: Option<Instant>,
    ) -> KeyDistribution {
        let algorithm = negotiation.algorithm;
        let mut errors = BTreeMap::new();
        let mut recipients = Vec::with_capacity(devices.len());

        for device in devices {
            match device.verified_key_for(algorithm) {
                Ok(public_key) => recipients.push((device.device_id.clone(), public_key.to_string())),
                Err(e) => {
                    warn!(device = %device.device_id, "fingerprint mismatch, device skipped");
                    errors.insert(device.device_id.clone(), e);
                }
            }
        }

        let report = bulk::encrypt_for_participants(
            Arc::clone(&self.providers),
            algorithm,
            key,
            recipients,
            deadline,
        )
        .await;
        errors.extend(report.errors);

        let created_at = Utc::now();
        let expires_at = self.key_lifetime.map(|lifetime| created_at + lifetime);
        let key_strength = self.providers.key_strength(algorithm);

        let mut seen = BTreeSet::new();
        let records = devices
            .iter()
            .filter(|device| seen.insert(device.device_id.as_str()))
            .filter_map(|device| {
                let encrypted_key = report.wrapped.get(&device.device_id)?;
                Some(EncryptionKeyRecord {
                    conversation_id: conversation_id.to_string(),
                    user_id: device.user_id.clone(),
                    device_id: device.device_id.clone(),
                    encrypted_key: encrypted_key.clone(),
                    public_key: device.public_key_for(algorithm).to_string(),
                    algorithm,
                    key_strength,
                    key_version: version,
                    created_by_device_id: created_by_device_id.to_string(),
                    created_at,
                    expires_at,
                    is_active: true,
                })
            })
            .collect();

        KeyDistribution {
            conversation_id: conversation_id.to_string(),
            key_version: version,
            algorithm,
            negotiation,
            records,
            errors,
            timed_out: report.timed_out,
        }
    }
}

/// The one conversation every record belongs to
fn single_conversation(records: &[EncryptionKeyRecord]) -> Result<String, CryptoError> {
    let first = records
        .first()
        .ok_or_else(|| CryptoError::NotInitialized("no key records".to_string()))?;
    if let Some(other) = records
        .iter()
        .find(|r| r.conversation_id != first.conversation_id)
    {
        return Err(CryptoError::MalformedInput(format!(
            "records span conversations {} and {}",
            first.conversation_id, other.conversation_id
        )));
    }
    Ok(first.conversation_id.clone())
}
