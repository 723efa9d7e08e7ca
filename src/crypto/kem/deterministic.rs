// INSECURE deterministic KEM for tests and development fallback
// Anyone holding the public key can recompute the secret; never enable in production

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use super::{Encapsulation, KemKeyPair, KemProvider, SharedSecret};
use crate::crypto::{random::generate_key, CryptoError};

const PROVIDER_NAME: &str = "deterministic-insecure";
const PUBLIC_KEY_LABEL: &[u8] = b"polykey-deterministic-pk";
const SECRET_LABEL: &[u8] = b"polykey-deterministic-ss";

/// Hash-based stand-in for a KEM
///
/// `pk = H(label || sk)`, `ct = r`, `ss = H(label || pk || r)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicProvider;

impl DeterministicProvider {
    pub fn new() -> Self {
        Self
    }

    fn public_from_private(private_key: &[u8]) -> [u8; 32] {
        hash(&[PUBLIC_KEY_LABEL, private_key])
    }
}

fn hash(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn expect_len(bytes: &[u8], what: &str) -> Result<(), CryptoError> {
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidKeyEncoding(format!(
            "{} must be 32 bytes, got {}",
            what,
            bytes.len()
        )));
    }
    Ok(())
}

impl KemProvider for DeterministicProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn is_production_safe(&self) -> bool {
        false
    }

    fn supported_levels(&self) -> BTreeSet<u16> {
        [512, 768, 1024].into_iter().collect()
    }

    fn generate_keypair(&self, level: u16) -> Result<KemKeyPair, CryptoError> {
        self.check_level(level)?;
        let private_key = generate_key()?;
        let public_key = Self::public_from_private(&private_key);
        Ok(KemKeyPair::new(public_key.to_vec(), private_key.to_vec()))
    }

    fn encapsulate(&self, public_key: &[u8], level: u16) -> Result<Encapsulation, CryptoError> {
        self.check_level(level)?;
        expect_len(public_key, "public key")?;

        let nonce = generate_key()?;
        let secret = hash(&[SECRET_LABEL, public_key, &nonce]);

        Ok(Encapsulation {
            ciphertext: nonce.to_vec(),
            shared_secret: SharedSecret::new(secret),
        })
    }

    fn decapsulate(
        &self,
        ciphertext: &[u8],
        private_key: &[u8],
        level: u16,
    ) -> Result<SharedSecret, CryptoError> {
        self.check_level(level)?;
        expect_len(private_key, "private key")?;
        if ciphertext.len() != 32 {
            return Err(CryptoError::KeyExchangeError("invalid ciphertext length".to_string()));
        }

        let public_key = Self::public_from_private(private_key);
        Ok(SharedSecret::new(hash(&[SECRET_LABEL, &public_key, ciphertext])))
    }
}
