// Wrapping a conversation key for one device
//
// encrypted_key = base64(JSON{version, algorithm, encapsulation, sealed}) where `sealed`
// is the conversation key encrypted under the encapsulated shared secret.

use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use super::{
    encoding::{decode_json, decode_key, encode, encode_json},
    kem::{KemProvider, RsaOaepProvider, SharedSecret},
    symmetric::{decrypt, encrypt_file, EncryptedPayload, SymmetricKey},
    CryptoError, ProviderSet,
};
use crate::algorithm::Algorithm;

pub const WRAP_FORMAT_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct WrappedKeyEnvelope {
    version: u8,
    algorithm: Algorithm,
    encapsulation: String,
    sealed: EncryptedPayload,
}

/// Base64-encoded device keypair for one algorithm
pub struct DeviceKeyPair {
    pub algorithm: Algorithm,
    pub public_key: String,
    pub private_key: Zeroizing<String>,
}

impl ProviderSet {
    /// Generate a device keypair usable with `algorithm`
    pub fn generate_device_keys(&self, algorithm: Algorithm) -> Result<DeviceKeyPair, CryptoError> {
        let (public_key, private_key) = match algorithm {
            Algorithm::Hybrid => {
                let pair = self.hybrid().generate_keypair()?;
                (pair.public_key, pair.private_key)
            }
            Algorithm::Classical => {
                let pair = self.classical().generate_keypair(self.classical_key_bits())?;
                (encode(&pair.public_key), Zeroizing::new(encode(pair.private_key())))
            }
            kem => {
                let pair = self.kem().generate_keypair(kem_level(kem)?)?;
                (encode(&pair.public_key), Zeroizing::new(encode(pair.private_key())))
            }
        };

        Ok(DeviceKeyPair {
            algorithm,
            public_key,
            private_key,
        })
    }

    /// Wrap `key` for the holder of `public_key`
    pub fn wrap_key(
        &self,
        algorithm: Algorithm,
        public_key: &str,
        key: &SymmetricKey,
    ) -> Result<String, CryptoError> {
        let (encapsulation, secret) = self.establish(algorithm, public_key)?;
        let sealed = encrypt_file(key.as_bytes(), secret.as_bytes())?;

        encode_json(&WrappedKeyEnvelope {
            version: WRAP_FORMAT_VERSION,
            algorithm,
            encapsulation,
            sealed,
        })
    }

    /// Recover the key wrapped by [`ProviderSet::wrap_key`]
    pub fn unwrap_key(
        &self,
        algorithm: Algorithm,
        encrypted_key: &str,
        private_key: &str,
    ) -> Result<SymmetricKey, CryptoError> {
        let envelope: WrappedKeyEnvelope = decode_json(encrypted_key)?;
        if envelope.version != WRAP_FORMAT_VERSION {
            return Err(CryptoError::MalformedInput(format!(
                "unsupported wrapped key version {}",
                envelope.version
            )));
        }
        if envelope.algorithm != algorithm {
            return Err(CryptoError::MalformedInput(format!(
                "key was wrapped with {}, record says {}",
                envelope.algorithm, algorithm
            )));
        }

        // Every failure past the envelope reads the same, whatever the algorithm
        self.open_sealed(algorithm, &envelope, private_key)
            .map_err(|e| {
                debug!(algorithm = %algorithm, error = %e, "key unwrap failed");
                CryptoError::IntegrityMismatch
            })
    }

    fn open_sealed(
        &self,
        algorithm: Algorithm,
        envelope: &WrappedKeyEnvelope,
        private_key: &str,
    ) -> Result<SymmetricKey, CryptoError> {
        let secret = self.recover(algorithm, &envelope.encapsulation, private_key)?;
        let key_bytes = Zeroizing::new(decrypt(&envelope.sealed, secret.as_bytes())?);
        SymmetricKey::from_slice(&key_bytes)
    }

    fn establish(&self, algorithm: Algorithm, public_key: &str) -> Result<(String, SharedSecret), CryptoError> {
        match algorithm {
            Algorithm::Hybrid => {
                let encapsulation = self.hybrid().encapsulate_hybrid(public_key)?;
                Ok((encapsulation.ciphertext, encapsulation.shared_secret))
            }
            Algorithm::Classical => {
                let public = decode_key(public_key)?;
                let level = RsaOaepProvider::level_of_public_key(&public)?;
                let encapsulation = self.classical().encapsulate(&public, level)?;
                Ok((encode(&encapsulation.ciphertext), encapsulation.shared_secret))
            }
            kem => {
                let encapsulation = self
                    .kem()
                    .encapsulate(&decode_key(public_key)?, kem_level(kem)?)?;
                Ok((encode(&encapsulation.ciphertext), encapsulation.shared_secret))
            }
        }
    }

    fn recover(
        &self,
        algorithm: Algorithm,
        encapsulation: &str,
        private_key: &str,
    ) -> Result<SharedSecret, CryptoError> {
        match algorithm {
            Algorithm::Hybrid => self.hybrid().decapsulate_hybrid(encapsulation, private_key),
            Algorithm::Classical => {
                let private = Zeroizing::new(decode_key(private_key)?);
                let ciphertext = decode_key(encapsulation)?;
                let level = RsaOaepProvider::level_of_ciphertext(&ciphertext)?;
                self.classical().decapsulate(&ciphertext, &private, level)
            }
            kem => {
                let private = Zeroizing::new(decode_key(private_key)?);
                self.kem()
                    .decapsulate(&decode_key(encapsulation)?, &private, kem_level(kem)?)
            }
        }
    }
}

fn kem_level(algorithm: Algorithm) -> Result<u16, CryptoError> {
    algorithm.kem_level().ok_or_else(|| {
        CryptoError::MalformedInput(format!("{} is not a pure KEM algorithm", algorithm))
    })
}
