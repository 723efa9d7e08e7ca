// Rotation triggers: usage count, key age, membership change, explicit request

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RotationConfig;
use crate::device::DeviceCapability;

use super::record::EncryptionKeyRecord;
use super::timeline::KeyTimeline;

/// Why a new key version was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    UsageLimit,
    Expired,
    MembershipChanged,
    Requested,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RotationReason::UsageLimit => "usage_limit",
            RotationReason::Expired => "expired",
            RotationReason::MembershipChanged => "membership_changed",
            RotationReason::Requested => "requested",
        };
        f.write_str(s)
    }
}

/// Caller-tracked usage of the current key version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUsage {
    pub key_version: u32,
    pub created_at: DateTime<Utc>,
    pub messages_encrypted: u64,
}

impl KeyUsage {
    pub fn new(key_version: u32, created_at: DateTime<Utc>) -> Self {
        Self {
            key_version,
            created_at,
            messages_encrypted: 0,
        }
    }

    pub fn record_message(&mut self) {
        self.messages_encrypted = self.messages_encrypted.saturating_add(1);
    }
}

// chrono::Duration panics above i64::MAX milliseconds
const MAX_AGE_SECS: i64 = i64::MAX / 1_000;

#[derive(Debug, Clone)]
pub struct RotationPolicy {
    max_messages: u64,
    max_key_age: Duration,
    rotate_on_membership_change: bool,
}

impl RotationPolicy {
    pub fn new(config: &RotationConfig) -> Self {
        let age_secs = i64::try_from(config.max_key_age_secs).unwrap_or(i64::MAX);
        Self {
            max_messages: config.max_messages,
            max_key_age: Duration::seconds(age_secs.min(MAX_AGE_SECS)),
            rotate_on_membership_change: config.rotate_on_membership_change,
        }
    }

    /// Usage limit wins over age when both apply
    pub fn evaluate(&self, usage: &KeyUsage, now: DateTime<Utc>) -> Option<RotationReason> {
        if usage.messages_encrypted >= self.max_messages {
            return Some(RotationReason::UsageLimit);
        }
        if now.signed_duration_since(usage.created_at) >= self.max_key_age {
            return Some(RotationReason::Expired);
        }
        None
    }

    /// Devices joined or left relative to the current active records
    pub fn membership_changed(
        &self,
        records: &[EncryptionKeyRecord],
        devices: &[DeviceCapability],
    ) -> Option<RotationReason> {
        if !self.rotate_on_membership_change {
            return None;
        }

        let conversation_id = records.first()?.conversation_id.clone();
        let timeline = KeyTimeline::new(conversation_id, records);
        let current: BTreeSet<&str> = timeline.active().iter().map(|r| r.device_id.as_str()).collect();
        let wanted: BTreeSet<&str> = devices.iter().map(|d| d.device_id.as_str()).collect();

        (current != wanted).then_some(RotationReason::MembershipChanged)
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::new(&RotationConfig::default())
    }
}
