// Classical key establishment: RSA-OAEP (SHA-256) shaped as a KEM
// "Encapsulation" encrypts a fresh random 32-byte secret to the recipient's RSA key

use std::collections::BTreeSet;

use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::{Encapsulation, KemKeyPair, KemProvider, SharedSecret};
use crate::crypto::{random::generate_key, CryptoError};

const PROVIDER_NAME: &str = "rsa-oaep";

/// Modulus sizes accepted for key generation
pub const RSA_LEVELS: [u16; 3] = [2048, 3072, 4096];

/// RSA-OAEP provider; keys are DER encoded (SPKI public, PKCS#8 private)
#[derive(Debug, Default, Clone, Copy)]
pub struct RsaOaepProvider;

impl RsaOaepProvider {
    pub fn new() -> Self {
        Self
    }

    /// Modulus size in bits of a DER-encoded public key
    pub fn modulus_bits(public_key: &[u8]) -> Result<usize, CryptoError> {
        Ok(parse_public_key(public_key)?.size() * 8)
    }

    /// Level to encapsulate at for a DER-encoded public key
    pub fn level_of_public_key(public_key: &[u8]) -> Result<u16, CryptoError> {
        level_from_bits(Self::modulus_bits(public_key)?)
    }

    /// Level a ciphertext was produced at; OAEP output is exactly one modulus long
    pub fn level_of_ciphertext(ciphertext: &[u8]) -> Result<u16, CryptoError> {
        level_from_bits(ciphertext.len() * 8)
    }
}

fn level_from_bits(bits: usize) -> Result<u16, CryptoError> {
    u16::try_from(bits).map_err(|_| CryptoError::UnsupportedSecurityLevel {
        provider: PROVIDER_NAME,
        level: u16::MAX,
    })
}

fn parse_public_key(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_der(der)
        .map_err(|e| CryptoError::InvalidKeyEncoding(format!("invalid RSA public key: {}", e)))
}

/// The key's modulus must match the requested level
fn expect_modulus(bits: usize, level: u16) -> Result<(), CryptoError> {
    if bits == usize::from(level) {
        Ok(())
    } else {
        Err(CryptoError::InvalidKeyEncoding(format!(
            "RSA key is {} bits, expected {}",
            bits, level
        )))
    }
}

impl KemProvider for RsaOaepProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supported_levels(&self) -> BTreeSet<u16> {
        RSA_LEVELS.into_iter().collect()
    }

    fn generate_keypair(&self, level: u16) -> Result<KemKeyPair, CryptoError> {
        self.check_level(level)?;

        let private = RsaPrivateKey::new(&mut OsRng, level as usize)
            .map_err(|e| CryptoError::KeyExchangeError(format!("RSA key generation failed: {}", e)))?;
        let public = RsaPublicKey::from(&private);

        let public_der = public
            .to_public_key_der()
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        let private_der = private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;

        Ok(KemKeyPair::new(
            public_der.as_bytes().to_vec(),
            private_der.as_bytes().to_vec(),
        ))
    }

    fn encapsulate(&self, public_key: &[u8], level: u16) -> Result<Encapsulation, CryptoError> {
        self.check_level(level)?;
        let public = parse_public_key(public_key)?;
        expect_modulus(public.size() * 8, level)?;

        let secret = Zeroizing::new(generate_key()?);
        let ciphertext = public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), secret.as_slice())
            .map_err(|e| CryptoError::KeyExchangeError(format!("RSA-OAEP encryption failed: {}", e)))?;

        Ok(Encapsulation {
            ciphertext,
            shared_secret: SharedSecret::new(*secret),
        })
    }

    fn decapsulate(
        &self,
        ciphertext: &[u8],
        private_key: &[u8],
        level: u16,
    ) -> Result<SharedSecret, CryptoError> {
        self.check_level(level)?;
        let private = RsaPrivateKey::from_pkcs8_der(private_key)
            .map_err(|_| CryptoError::InvalidKeyEncoding("invalid RSA private key".to_string()))?;
        expect_modulus(private.size() * 8, level)?;

        // Wrong key and tampered ciphertext are indistinguishable here
        let secret = Zeroizing::new(
            private
                .decrypt(Oaep::new::<Sha256>(), ciphertext)
                .map_err(|_| CryptoError::IntegrityMismatch)?,
        );

        SharedSecret::from_slice(&secret)
    }
}
