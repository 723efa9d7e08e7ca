// Key derivation: HKDF subkeys, password-based keys and hybrid secret combination

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::{kem::SharedSecret, CryptoError};

/// HKDF info label for the CBC encryption subkey
pub const CIPHER_KEY_INFO: &[u8] = b"polykey-cbc-key-v1";

/// HKDF info label for the HMAC subkey
pub const MAC_KEY_INFO: &[u8] = b"polykey-hmac-key-v1";

/// Derive a 256-bit subkey bound to `info`
pub fn derive_subkey(key: &[u8; 32], info: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, key);

    let mut output = Zeroizing::new([0u8; 32]);
    hk.expand(info, &mut output[..])
        .map_err(|_| CryptoError::KeyExchangeError("HKDF expansion failed".to_string()))?;

    Ok(output)
}

/// Stretch a password into a 256-bit key with PBKDF2-HMAC-SHA256
pub fn derive_password_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key[..]);
    key
}

/// Combine the classical and KEM halves of a hybrid exchange
///
/// `SHA-256(classical || kem)`: recovering the output requires both inputs.
pub fn combine_secrets(classical: &SharedSecret, kem: &SharedSecret) -> SharedSecret {
    let mut hasher = Sha256::new();
    hasher.update(classical.as_bytes());
    hasher.update(kem.as_bytes());

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    SharedSecret::new(bytes)
}
