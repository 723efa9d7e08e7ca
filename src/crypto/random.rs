// Cryptographically secure random number generation
// Thin wrappers around the system CSPRNG

use rand::rngs::OsRng;
use rand::RngCore;

use super::CryptoError;

/// Generate cryptographically secure random bytes
pub fn secure_random_bytes(length: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buffer = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut buffer)
        .map_err(|e| CryptoError::EncryptionError(format!("random generator failed: {}", e)))?;
    Ok(buffer)
}

/// Generate a 256-bit random key
pub fn generate_key() -> Result<[u8; 32], CryptoError> {
    fill::<32>()
}

/// Generate a 128-bit IV for CBC mode
pub fn generate_iv() -> Result<[u8; 16], CryptoError> {
    fill::<16>()
}

/// Generate a 96-bit nonce for AES-GCM
pub fn generate_nonce() -> Result<[u8; 12], CryptoError> {
    fill::<12>()
}

fn fill<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    OsRng
        .try_fill_bytes(&mut out)
        .map_err(|e| CryptoError::EncryptionError(format!("random generator failed: {}", e)))?;
    Ok(out)
}
