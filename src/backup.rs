// Password-protected backup of a user's key material
//
// PBKDF2-HMAC-SHA256 stretches the password; AES-256-GCM seals the JSON key material.
// blob = base64(JSON{salt, encrypted_data = nonce || ciphertext, version, iterations})

use std::collections::BTreeMap;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use crate::config::{BackupConfig, MIN_PASSWORD_LENGTH, MIN_SALT_LENGTH};
use crate::crypto::{
    encoding::{base64_bytes, decode_json, encode_json},
    kdf::derive_password_key,
    random::{generate_nonce, secure_random_bytes},
    CryptoError,
};

pub const BACKUP_VERSION: &str = "2.0";

const NONCE_SIZE: usize = 12;
const GCM_TAG_SIZE: usize = 16;

/// Refuse blobs demanding absurd KDF work
const MAX_KDF_ITERATIONS: u32 = 10_000_000;

/// Everything needed to restore a user's devices and conversations
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub user_id: String,
    /// Device private key (base64)
    pub private_key: String,
    /// conversation_id -> base64 conversation key
    #[serde(default)]
    pub conversation_keys: BTreeMap<String, String>,
}

impl KeyMaterial {
    pub fn new(user_id: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            private_key: private_key.into(),
            conversation_keys: BTreeMap::new(),
        }
    }

    pub fn with_conversation_key(mut self, conversation_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.conversation_keys.insert(conversation_id.into(), key.into());
        self
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.private_key.zeroize();
        for key in self.conversation_keys.values_mut() {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("user_id", &self.user_id)
            .field("private_key", &"[REDACTED]")
            .field("conversations", &self.conversation_keys.len())
            .finish()
    }
}

/// Decoded backup envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupBlob {
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub encrypted_data: Vec<u8>,
    pub version: String,
    /// KDF cost at creation; absent means the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

pub struct BackupManager {
    config: BackupConfig,
}

impl BackupManager {
    pub fn new(config: BackupConfig) -> Self {
        Self { config }
    }

    /// Seal `material` under `password`
    pub fn create_backup(&self, password: &str, material: &KeyMaterial) -> Result<String, CryptoError> {
        let min_length = self.config.min_password_length.max(MIN_PASSWORD_LENGTH);
        if password.chars().count() < min_length {
            return Err(CryptoError::WeakPassword { min_length });
        }

        let salt = secure_random_bytes(self.config.salt_length.max(MIN_SALT_LENGTH))?;
        let key = derive_password_key(password, &salt, self.config.kdf_iterations);
        let cipher = Aes256Gcm::new((&*key).into());

        let plaintext = Zeroizing::new(
            serde_json::to_vec(material)
                .map_err(|e| CryptoError::EncryptionError(format!("key material: {}", e)))?,
        );
        let nonce = generate_nonce()?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| CryptoError::EncryptionError("backup encryption failed".to_string()))?;

        let mut encrypted_data = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        encrypted_data.extend_from_slice(&nonce);
        encrypted_data.extend_from_slice(&ciphertext);

        info!(
            user = %material.user_id,
            conversations = material.conversation_keys.len(),
            "backup created"
        );

        encode_json(&BackupBlob {
            salt,
            encrypted_data,
            version: BACKUP_VERSION.to_string(),
            iterations: Some(self.config.kdf_iterations),
        })
    }

    /// Open a backup; a wrong password surfaces as `DecryptionFailed`
    pub fn restore_backup(&self, blob: &str, password: &str) -> Result<KeyMaterial, CryptoError> {
        let envelope = self.inspect_backup(blob)?;
        let iterations = envelope.iterations.unwrap_or(self.config.kdf_iterations);

        let key = derive_password_key(password, &envelope.salt, iterations);
        let cipher = Aes256Gcm::new((&*key).into());

        let (nonce, ciphertext) = envelope.encrypted_data.split_at(NONCE_SIZE);
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| CryptoError::DecryptionFailed)?,
        );

        let material: KeyMaterial = serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::MalformedInput(format!("backup contents: {}", e)))?;

        debug!(user = %material.user_id, "backup restored");
        Ok(material)
    }

    /// Parse and check the envelope without deriving a key
    pub fn inspect_backup(&self, blob: &str) -> Result<BackupBlob, CryptoError> {
        let envelope: BackupBlob = decode_json(blob)?;

        if envelope.version != BACKUP_VERSION {
            return Err(CryptoError::MalformedInput(format!(
                "unsupported backup version {}",
                envelope.version
            )));
        }
        if envelope.salt.len() < MIN_SALT_LENGTH {
            return Err(CryptoError::MalformedInput(format!(
                "backup salt shorter than {} bytes",
                MIN_SALT_LENGTH
            )));
        }
        if envelope.encrypted_data.len() < NONCE_SIZE + GCM_TAG_SIZE {
            return Err(CryptoError::MalformedInput("backup data truncated".to_string()));
        }
        if let Some(iterations) = envelope.iterations {
            if iterations == 0 || iterations > MAX_KDF_ITERATIONS {
                return Err(CryptoError::MalformedInput(format!(
                    "backup KDF cost {} out of range",
                    iterations
                )));
            }
        }

        Ok(envelope)
    }
}

impl Default for BackupManager {
    fn default() -> Self {
        Self::new(BackupConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encoding::encode;

    fn manager() -> BackupManager {
        BackupManager::new(BackupConfig {
            kdf_iterations: 1_000,
            ..BackupConfig::default()
        })
    }

    fn material() -> KeyMaterial {
        KeyMaterial::new("alice", encode(b"device private key"))
            .with_conversation_key("conv-1", encode(&[1u8; 32]))
            .with_conversation_key("conv-2", encode(&[2u8; 32]))
    }

    #[test]
    fn test_backup_restore() {
        let manager = manager();
        let blob = manager.create_backup("correct horse", &material()).unwrap();
        let restored = manager.restore_backup(&blob, "correct horse").unwrap();

        assert_eq!(restored, material());
        assert_eq!(
            serde_json::to_vec(&restored).unwrap(),
            serde_json::to_vec(&material()).unwrap()
        );
    }

    #[test]
    fn test_restore_is_idempotent() {
        let manager = manager();
        let blob = manager.create_backup("correct horse", &material()).unwrap();

        let first = manager.restore_backup(&blob, "correct horse").unwrap();
        let second = manager.restore_backup(&blob, "correct horse").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_wrong_passwords_fail_decryption() {
        let manager = manager();
        let blob = manager.create_backup("correct horse", &material()).unwrap();

        for i in 0..100 {
            let password = format!("wrong password {}", i);
            assert_eq!(
                manager.restore_backup(&blob, &password).unwrap_err(),
                CryptoError::DecryptionFailed
            );
        }
    }

    #[test]
    fn test_weak_password_rejected() {
        assert_eq!(
            manager().create_backup("short", &material()).unwrap_err(),
            CryptoError::WeakPassword { min_length: 8 }
        );
    }

    #[test]
    fn test_configured_minimum_never_below_eight() {
        let lax = BackupManager::new(BackupConfig {
            kdf_iterations: 1_000,
            min_password_length: 1,
            ..BackupConfig::default()
        });
        assert_eq!(
            lax.create_backup("abc", &material()).unwrap_err(),
            CryptoError::WeakPassword { min_length: 8 }
        );
        lax.create_backup("abcdefgh", &material()).unwrap();
    }

    #[test]
    fn test_blob_format() {
        let manager = manager();
        let blob = manager.create_backup("correct horse", &material()).unwrap();
        let envelope = manager.inspect_backup(&blob).unwrap();

        assert_eq!(envelope.version, "2.0");
        assert_eq!(envelope.salt.len(), 32);
        assert_eq!(envelope.iterations, Some(1_000));

        // Two backups of the same material never share salt or ciphertext
        let again = manager.inspect_backup(&manager.create_backup("correct horse", &material()).unwrap()).unwrap();
        assert_ne!(envelope.salt, again.salt);
        assert_ne!(envelope.encrypted_data, again.encrypted_data);
    }

    #[test]
    fn test_missing_iterations_uses_configured_default() {
        let manager = manager();
        let blob = manager.create_backup("correct horse", &material()).unwrap();
        let mut envelope = manager.inspect_backup(&blob).unwrap();
        envelope.iterations = None;

        let legacy = encode_json(&envelope).unwrap();
        assert_eq!(manager.restore_backup(&legacy, "correct horse").unwrap(), material());
    }

    #[test]
    fn test_tampered_data_fails_decryption() {
        let manager = manager();
        let blob = manager.create_backup("correct horse", &material()).unwrap();
        let mut envelope = manager.inspect_backup(&blob).unwrap();
        let last = envelope.encrypted_data.len() - 1;
        envelope.encrypted_data[last] ^= 1;

        let tampered = encode_json(&envelope).unwrap();
        assert_eq!(
            manager.restore_backup(&tampered, "correct horse").unwrap_err(),
            CryptoError::DecryptionFailed
        );
    }

    #[test]
    fn test_malformed_blobs() {
        let manager = manager();
        let blobs = vec![
            String::new(),
            "not base64 !!".to_string(),
            encode(b"{}"),
            encode(b"[1,2,3]"),
        ];
        for blob in &blobs {
            assert!(
                matches!(manager.restore_backup(blob, "correct horse"), Err(CryptoError::MalformedInput(_))),
                "{:?}",
                blob
            );
        }

        let short_salt = encode_json(&BackupBlob {
            salt: vec![0; 8],
            encrypted_data: vec![0; 64],
            version: BACKUP_VERSION.into(),
            iterations: None,
        })
        .unwrap();
        assert!(matches!(manager.inspect_backup(&short_salt), Err(CryptoError::MalformedInput(_))));

        let future = encode_json(&BackupBlob {
            salt: vec![0; 32],
            encrypted_data: vec![0; 64],
            version: "3.0".into(),
            iterations: None,
        })
        .unwrap();
        assert!(matches!(manager.inspect_backup(&future), Err(CryptoError::MalformedInput(_))));
    }
}
