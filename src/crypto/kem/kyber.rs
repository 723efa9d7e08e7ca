// Post-quantum key encapsulation using Kyber (512 / 768 / 1024)
// Backed by the PQClean implementations in pqcrypto-kyber

use std::collections::BTreeSet;

use pqcrypto_traits::kem::{
    Ciphertext as PQCiphertext, PublicKey as PQPublicKey, SecretKey as PQSecretKey,
    SharedSecret as PQSharedSecret,
};

use super::{Encapsulation, KemKeyPair, KemProvider, SharedSecret};
use crate::crypto::CryptoError;

const PROVIDER_NAME: &str = "pqclean-kyber";

/// Expands `$body` with `$m` bound to the Kyber module for `$level`
macro_rules! with_kyber {
    ($level:expr, |$m:ident| $body:block) => {
        match $level {
            512 => {
                use pqcrypto_kyber::kyber512 as $m;
                $body
            }
            768 => {
                use pqcrypto_kyber::kyber768 as $m;
                $body
            }
            1024 => {
                use pqcrypto_kyber::kyber1024 as $m;
                $body
            }
            other => Err(CryptoError::UnsupportedSecurityLevel {
                provider: PROVIDER_NAME,
                level: other,
            }),
        }
    };
}

/// Kyber KEM provider
#[derive(Debug, Default, Clone, Copy)]
pub struct KyberProvider;

impl KyberProvider {
    pub fn new() -> Self {
        Self
    }
}

impl KemProvider for KyberProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supported_levels(&self) -> BTreeSet<u16> {
        [512, 768, 1024].into_iter().collect()
    }

    fn generate_keypair(&self, level: u16) -> Result<KemKeyPair, CryptoError> {
        with_kyber!(level, |m| {
            let (pk, sk) = m::keypair();
            Ok(KemKeyPair::new(pk.as_bytes().to_vec(), sk.as_bytes().to_vec()))
        })
    }

    fn encapsulate(&self, public_key: &[u8], level: u16) -> Result<Encapsulation, CryptoError> {
        with_kyber!(level, |m| {
            let pk = m::PublicKey::from_bytes(public_key).map_err(|_| {
                CryptoError::InvalidKeyEncoding(format!(
                    "expected a {} byte kem-{} public key, got {} bytes",
                    m::public_key_bytes(),
                    level,
                    public_key.len()
                ))
            })?;

            let (ss, ct) = m::encapsulate(&pk);

            Ok(Encapsulation {
                ciphertext: ct.as_bytes().to_vec(),
                shared_secret: SharedSecret::from_slice(ss.as_bytes())?,
            })
        })
    }

    fn decapsulate(
        &self,
        ciphertext: &[u8],
        private_key: &[u8],
        level: u16,
    ) -> Result<SharedSecret, CryptoError> {
        with_kyber!(level, |m| {
            let sk = m::SecretKey::from_bytes(private_key).map_err(|_| {
                CryptoError::InvalidKeyEncoding(format!("invalid kem-{} secret key", level))
            })?;
            let ct = m::Ciphertext::from_bytes(ciphertext).map_err(|_| {
                CryptoError::KeyExchangeError(format!("invalid kem-{} ciphertext", level))
            })?;

            let ss = m::decapsulate(&ct, &sk);
            SharedSecret::from_slice(ss.as_bytes())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encapsulation_decapsulation_all_levels() {
        let provider = KyberProvider::new();

        for level in provider.supported_levels() {
            let keypair = provider.generate_keypair(level).unwrap();

            let encapsulation = provider.encapsulate(&keypair.public_key, level).unwrap();
            let decapsulated = provider
                .decapsulate(&encapsulation.ciphertext, keypair.private_key(), level)
                .unwrap();

            assert_eq!(encapsulation.shared_secret.as_bytes(), decapsulated.as_bytes());
        }
    }

    #[test]
    fn test_key_sizes_differ_per_level() {
        let provider = KyberProvider::new();
        let small = provider.generate_keypair(512).unwrap();
        let large = provider.generate_keypair(1024).unwrap();

        assert_eq!(small.public_key.len(), pqcrypto_kyber::kyber512::public_key_bytes());
        assert_eq!(large.public_key.len(), pqcrypto_kyber::kyber1024::public_key_bytes());
    }

    #[test]
    fn test_unsupported_level() {
        let provider = KyberProvider::new();
        assert!(matches!(
            provider.generate_keypair(256),
            Err(CryptoError::UnsupportedSecurityLevel { level: 256, .. })
        ));
    }

    #[test]
    fn test_invalid_public_key() {
        let provider = KyberProvider::new();
        let invalid_bytes = vec![0u8; 10];
        assert!(matches!(
            provider.encapsulate(&invalid_bytes, 768),
            Err(CryptoError::InvalidKeyEncoding(_))
        ));
    }

    #[test]
    fn test_level_mismatch_is_rejected() {
        let provider = KyberProvider::new();
        let keypair = provider.generate_keypair(1024).unwrap();
        assert!(provider.encapsulate(&keypair.public_key, 768).is_err());
    }

    #[test]
    fn test_wrong_private_key_gives_different_secret() {
        let provider = KyberProvider::new();
        let alice = provider.generate_keypair(768).unwrap();
        let mallory = provider.generate_keypair(768).unwrap();

        let encapsulation = provider.encapsulate(&alice.public_key, 768).unwrap();
        let recovered = provider
            .decapsulate(&encapsulation.ciphertext, mallory.private_key(), 768)
            .unwrap();

        assert_ne!(encapsulation.shared_secret.as_bytes(), recovered.as_bytes());
    }
}
