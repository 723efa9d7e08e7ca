// Per-device key records returned to the caller for persistence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::algorithm::Algorithm;
use crate::crypto::CryptoError;

/// One wrapped conversation key for one device at one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKeyRecord {
    pub conversation_id: String,
    pub user_id: String,
    pub device_id: String,
    /// Wrapped conversation key (base64)
    pub encrypted_key: String,
    /// Device public key the conversation key was wrapped for (base64)
    pub public_key: String,
    pub algorithm: Algorithm,
    pub key_strength: u32,
    pub key_version: u32,
    pub created_by_device_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl EncryptionKeyRecord {
    /// Copy of this record with `is_active = false`
    pub fn deactivated(&self) -> Self {
        Self {
            is_active: false,
            ..self.clone()
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires| now >= expires)
    }

    pub fn to_json(&self) -> Result<String, CryptoError> {
        serde_json::to_string(self).map_err(|e| CryptoError::MalformedInput(format!("key record: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self, CryptoError> {
        serde_json::from_str(json).map_err(|e| CryptoError::MalformedInput(format!("key record: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> EncryptionKeyRecord {
        EncryptionKeyRecord {
            conversation_id: "conv".into(),
            user_id: "alice".into(),
            device_id: "phone".into(),
            encrypted_key: "AAAA".into(),
            public_key: "BBBB".into(),
            algorithm: Algorithm::Kem768,
            key_strength: 768,
            key_version: 3,
            created_by_device_id: "laptop".into(),
            created_at: Utc::now(),
            expires_at: None,
            is_active: true,
        }
    }

    #[test]
    fn test_deactivated_is_a_copy() {
        let active = record();
        let inactive = active.deactivated();
        assert!(active.is_active);
        assert!(!inactive.is_active);
        assert_eq!(inactive.key_version, active.key_version);
        assert_eq!(inactive.encrypted_key, active.encrypted_key);
    }

    #[test]
    fn test_expiry() {
        let mut record = record();
        let now = Utc::now();
        assert!(!record.is_expired(now));

        record.expires_at = Some(now - Duration::seconds(1));
        assert!(record.is_expired(now));
    }

    #[test]
    fn test_json_field_names() {
        let json: serde_json::Value = serde_json::from_str(&record().to_json().unwrap()).unwrap();
        assert_eq!(json["algorithm"], "kem-768");
        assert_eq!(json["key_version"], 3);
        assert_eq!(json["is_active"], true);
        assert!(json.get("expires_at").is_none());

        let parsed = EncryptionKeyRecord::from_json(&json.to_string()).unwrap();
        assert_eq!(parsed.device_id, "phone");
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            EncryptionKeyRecord::from_json("{}"),
            Err(CryptoError::MalformedInput(_))
        ));
    }
}
