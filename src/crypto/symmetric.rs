// Symmetric payload encryption: AES-256-CBC with an HMAC-SHA256 integrity tag
// Encrypt-then-MAC; the tag is always verified before any block is decrypted

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use super::{
    encoding::base64_bytes,
    kdf::{derive_subkey, CIPHER_KEY_INFO, MAC_KEY_INFO},
    random::{generate_iv, generate_key},
    CryptoError,
};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const TAG_SIZE: usize = 32;

/// Encrypted payload: ciphertext, IV and integrity tag
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub tag: Vec<u8>,
}

/// Per-conversation symmetric key (zeroized on drop)
#[derive(Clone, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; KEY_SIZE],
}

impl SymmetricKey {
    /// Create a new symmetric key from bytes
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Generate a fresh random key
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self::new(generate_key()?))
    }

    /// Get the key as a byte slice
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Create from a slice (must be exactly 32 bytes)
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = slice.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: slice.len(),
        })?;
        Ok(Self { key })
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Encrypt a chat message; empty messages are rejected
pub fn encrypt_message(plaintext: &[u8], key: &[u8]) -> Result<EncryptedPayload, CryptoError> {
    if plaintext.is_empty() {
        return Err(CryptoError::EmptyMessage);
    }
    encrypt_file(plaintext, key)
}

/// Encrypt arbitrary binary data, including empty payloads
pub fn encrypt_file(data: &[u8], key: &[u8]) -> Result<EncryptedPayload, CryptoError> {
    let key = SymmetricKey::from_slice(key)?;
    let cipher_key = derive_subkey(key.as_bytes(), CIPHER_KEY_INFO)?;
    let mac_key = derive_subkey(key.as_bytes(), MAC_KEY_INFO)?;

    let iv = generate_iv()?;
    let ciphertext = Aes256CbcEnc::new((&*cipher_key).into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(data);

    let tag = integrity_mac(&mac_key, &iv, &ciphertext)?
        .finalize()
        .into_bytes()
        .to_vec();

    Ok(EncryptedPayload {
        ciphertext,
        iv: iv.to_vec(),
        tag,
    })
}

/// Verify the integrity tag, then decrypt
pub fn decrypt(payload: &EncryptedPayload, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = SymmetricKey::from_slice(key)?;
    if payload.iv.len() != IV_SIZE {
        return Err(CryptoError::MalformedInput(format!(
            "IV must be {} bytes, got {}",
            IV_SIZE,
            payload.iv.len()
        )));
    }

    let mac_key = derive_subkey(key.as_bytes(), MAC_KEY_INFO)?;
    integrity_mac(&mac_key, &payload.iv, &payload.ciphertext)?
        .verify_slice(&payload.tag)
        .map_err(|_| CryptoError::IntegrityMismatch)?;

    let cipher_key = derive_subkey(key.as_bytes(), CIPHER_KEY_INFO)?;
    let iv: [u8; IV_SIZE] = payload
        .iv
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::IntegrityMismatch)?;

    Aes256CbcDec::new((&*cipher_key).into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&payload.ciphertext)
        .map_err(|_| CryptoError::IntegrityMismatch)
}

fn integrity_mac(mac_key: &[u8; 32], iv: &[u8], ciphertext: &[u8]) -> Result<HmacSha256, CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key)
        .map_err(|_| CryptoError::EncryptionError("HMAC initialization failed".to_string()))?;
    mac.update(iv);
    mac.update(ciphertext);
    Ok(mac)
}
