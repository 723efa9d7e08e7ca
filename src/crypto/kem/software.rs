// Pure-Rust ML-KEM (FIPS 203) at 512 / 768 / 1024
// Fallback for platforms where the native PQClean build is unavailable

use std::collections::BTreeSet;

use ml_kem::kem::{Decapsulate, Encapsulate};
use ml_kem::{Ciphertext, EncodedSizeUser, KemCore, MlKem1024, MlKem512, MlKem768};
use rand::rngs::OsRng;

use super::{Encapsulation, KemKeyPair, KemProvider, SharedSecret};
use crate::crypto::CryptoError;

const PROVIDER_NAME: &str = "rustcrypto-ml-kem";

/// Expands `$body` with `$k` bound to the parameter set for `$level`
macro_rules! with_ml_kem {
    ($level:expr, |$k:ident| $body:block) => {
        match $level {
            512 => {
                type $k = MlKem512;
                $body
            }
            768 => {
                type $k = MlKem768;
                $body
            }
            1024 => {
                type $k = MlKem1024;
                $body
            }
            other => Err(CryptoError::UnsupportedSecurityLevel {
                provider: PROVIDER_NAME,
                level: other,
            }),
        }
    };
}

/// Decode a fixed-size key, `None` when the length is wrong
fn from_encoded<T: EncodedSizeUser>(bytes: &[u8]) -> Option<T> {
    let encoded = bytes.try_into().ok()?;
    Some(T::from_bytes(&encoded))
}

/// ML-KEM provider from the RustCrypto `ml-kem` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct MlKemProvider;

impl MlKemProvider {
    pub fn new() -> Self {
        Self
    }
}

impl KemProvider for MlKemProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supported_levels(&self) -> BTreeSet<u16> {
        [512, 768, 1024].into_iter().collect()
    }

    fn generate_keypair(&self, level: u16) -> Result<KemKeyPair, CryptoError> {
        with_ml_kem!(level, |K| {
            let (dk, ek) = K::generate(&mut OsRng);
            Ok(KemKeyPair::new(ek.as_bytes().to_vec(), dk.as_bytes().to_vec()))
        })
    }

    fn encapsulate(&self, public_key: &[u8], level: u16) -> Result<Encapsulation, CryptoError> {
        with_ml_kem!(level, |K| {
            let ek: <K as KemCore>::EncapsulationKey = from_encoded(public_key).ok_or_else(|| {
                CryptoError::InvalidKeyEncoding(format!(
                    "wrong length for a kem-{} public key: {} bytes",
                    level,
                    public_key.len()
                ))
            })?;

            let (ct, ss) = ek
                .encapsulate(&mut OsRng)
                .map_err(|_| CryptoError::KeyExchangeError(format!("kem-{} encapsulation failed", level)))?;

            Ok(Encapsulation {
                ciphertext: ct.to_vec(),
                shared_secret: SharedSecret::from_slice(&ss)?,
            })
        })
    }

    fn decapsulate(
        &self,
        ciphertext: &[u8],
        private_key: &[u8],
        level: u16,
    ) -> Result<SharedSecret, CryptoError> {
        with_ml_kem!(level, |K| {
            let dk: <K as KemCore>::DecapsulationKey = from_encoded(private_key).ok_or_else(|| {
                CryptoError::InvalidKeyEncoding(format!("invalid kem-{} secret key", level))
            })?;
            let ct = Ciphertext::<K>::try_from(ciphertext).map_err(|_| {
                CryptoError::KeyExchangeError(format!("invalid kem-{} ciphertext", level))
            })?;

            let ss = dk
                .decapsulate(&ct)
                .map_err(|_| CryptoError::KeyExchangeError(format!("kem-{} decapsulation failed", level)))?;
            SharedSecret::from_slice(&ss)
        })
    }
}
