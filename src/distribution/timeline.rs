// Version view over the key records of one conversation

use std::collections::{BTreeMap, BTreeSet};

use crate::algorithm::Algorithm;
use crate::crypto::CryptoError;

use super::record::EncryptionKeyRecord;

/// Borrowed index of a conversation's records by version
pub struct KeyTimeline<'a> {
    conversation_id: String,
    by_version: BTreeMap<u32, Vec<&'a EncryptionKeyRecord>>,
}

impl<'a> KeyTimeline<'a> {
    /// Index the records belonging to `conversation_id`; others are ignored
    pub fn new(conversation_id: impl Into<String>, records: &'a [EncryptionKeyRecord]) -> Self {
        let conversation_id = conversation_id.into();
        let mut by_version: BTreeMap<u32, Vec<&'a EncryptionKeyRecord>> = BTreeMap::new();
        for record in records.iter().filter(|r| r.conversation_id == conversation_id) {
            by_version.entry(record.key_version).or_default().push(record);
        }
        Self {
            conversation_id,
            by_version,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn is_empty(&self) -> bool {
        self.by_version.is_empty()
    }

    /// Highest version that still has an active record
    pub fn current_version(&self) -> Option<u32> {
        self.by_version
            .iter()
            .rev()
            .find(|(_, records)| records.iter().any(|r| r.is_active))
            .map(|(version, _)| *version)
    }

    /// Highest version ever issued, active or not
    pub fn latest_version(&self) -> Option<u32> {
        self.by_version.keys().next_back().copied()
    }

    pub fn versions(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_version.keys().copied()
    }

    pub fn records_at(&self, version: u32) -> &[&'a EncryptionKeyRecord] {
        self.by_version.get(&version).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Active records of the current version
    pub fn active(&self) -> Vec<&'a EncryptionKeyRecord> {
        match self.current_version() {
            Some(version) => self
                .records_at(version)
                .iter()
                .filter(|r| r.is_active)
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn record_for(&self, device_id: &str, version: u32) -> Option<&'a EncryptionKeyRecord> {
        self.records_at(version)
            .iter()
            .find(|r| r.device_id == device_id)
            .copied()
    }

    /// Algorithm shared by the active records of the current version
    pub fn current_algorithm(&self) -> Option<Algorithm> {
        self.active().first().map(|r| r.algorithm)
    }

    /// Active records of a version agree on algorithm and name each device once
    pub fn validate(&self) -> Result<(), CryptoError> {
        for (version, records) in &self.by_version {
            let mut algorithms = BTreeSet::new();
            let mut devices = BTreeSet::new();
            for record in records.iter().filter(|r| r.is_active) {
                algorithms.insert(record.algorithm);
                if !devices.insert(record.device_id.as_str()) {
                    return Err(CryptoError::MalformedInput(format!(
                        "device {} has two active records at version {}",
                        record.device_id, version
                    )));
                }
            }
            if algorithms.len() > 1 {
                return Err(CryptoError::MalformedInput(format!(
                    "version {} mixes algorithms {:?}",
                    version, algorithms
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(device: &str, version: u32, algorithm: Algorithm, active: bool) -> EncryptionKeyRecord {
        EncryptionKeyRecord {
            conversation_id: "conv".into(),
            user_id: "user".into(),
            device_id: device.into(),
            encrypted_key: String::new(),
            public_key: String::new(),
            algorithm,
            key_strength: 0,
            key_version: version,
            created_by_device_id: "a".into(),
            created_at: Utc::now(),
            expires_at: None,
            is_active: active,
        }
    }

    #[test]
    fn test_current_version_skips_inactive() {
        let records = vec![
            record("a", 1, Algorithm::Kem768, false),
            record("b", 1, Algorithm::Kem768, false),
            record("a", 2, Algorithm::Classical, true),
            record("b", 2, Algorithm::Classical, true),
        ];
        let timeline = KeyTimeline::new("conv", &records);

        assert_eq!(timeline.current_version(), Some(2));
        assert_eq!(timeline.current_algorithm(), Some(Algorithm::Classical));
        assert_eq!(timeline.active().len(), 2);
        assert_eq!(timeline.versions().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(timeline.record_for("b", 1).unwrap().algorithm, Algorithm::Kem768);
        timeline.validate().unwrap();
    }

    #[test]
    fn test_other_conversations_ignored() {
        let mut other = record("a", 7, Algorithm::Kem768, true);
        other.conversation_id = "elsewhere".into();
        let records = vec![record("a", 1, Algorithm::Kem768, true), other];

        let timeline = KeyTimeline::new("conv", &records);
        assert_eq!(timeline.latest_version(), Some(1));
    }

    #[test]
    fn test_mixed_algorithms_rejected() {
        let records = vec![
            record("a", 1, Algorithm::Kem768, true),
            record("b", 1, Algorithm::Kem1024, true),
        ];
        assert!(KeyTimeline::new("conv", &records).validate().is_err());
    }

    #[test]
    fn test_duplicate_device_rejected() {
        let records = vec![
            record("a", 1, Algorithm::Kem768, true),
            record("a", 1, Algorithm::Kem768, true),
        ];
        assert!(KeyTimeline::new("conv", &records).validate().is_err());
    }

    #[test]
    fn test_empty() {
        let timeline = KeyTimeline::new("conv", &[]);
        assert!(timeline.is_empty());
        assert_eq!(timeline.current_version(), None);
        assert!(timeline.active().is_empty());
    }
}
