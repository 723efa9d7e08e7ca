// Key encapsulation providers
// One interface over classical RSA-OAEP, native Kyber, software ML-KEM and the deterministic test scheme

pub mod classical;
pub mod deterministic;
pub mod kyber;
pub mod registry;
pub mod software;

pub use classical::RsaOaepProvider;
pub use deterministic::DeterministicProvider;
pub use kyber::KyberProvider;
pub use software::MlKemProvider;

use std::collections::BTreeSet;

use zeroize::{ZeroizeOnDrop, Zeroizing};

use super::CryptoError;

/// Shared secret produced by an encapsulation (zeroized on drop)
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: [u8; 32],
}

impl SharedSecret {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Build from a slice that must be exactly 32 bytes
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| CryptoError::KeyExchangeError("shared secret must be 32 bytes".to_string()))?;
        Ok(Self { bytes })
    }

    /// Get the shared secret as a byte slice
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Raw keypair as produced by a provider
#[derive(ZeroizeOnDrop)]
pub struct KemKeyPair {
    #[zeroize(skip)]
    pub public_key: Vec<u8>,
    private_key: Zeroizing<Vec<u8>>,
}

impl KemKeyPair {
    pub fn new(public_key: Vec<u8>, private_key: Vec<u8>) -> Self {
        Self {
            public_key,
            private_key: Zeroizing::new(private_key),
        }
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

/// Ciphertext plus the secret it encapsulates
pub struct Encapsulation {
    pub ciphertext: Vec<u8>,
    pub shared_secret: SharedSecret,
}

/// Asymmetric key establishment, independent of the underlying primitive
pub trait KemProvider: Send + Sync {
    /// Stable provider name used in logs and errors
    fn name(&self) -> &'static str;

    /// Whether this provider may be used outside development
    fn is_production_safe(&self) -> bool {
        true
    }

    fn supported_levels(&self) -> BTreeSet<u16>;

    fn generate_keypair(&self, level: u16) -> Result<KemKeyPair, CryptoError>;

    fn encapsulate(&self, public_key: &[u8], level: u16) -> Result<Encapsulation, CryptoError>;

    /// Must reproduce exactly the secret of the matching `encapsulate` call
    fn decapsulate(
        &self,
        ciphertext: &[u8],
        private_key: &[u8],
        level: u16,
    ) -> Result<SharedSecret, CryptoError>;

    fn check_level(&self, level: u16) -> Result<(), CryptoError> {
        if self.supported_levels().contains(&level) {
            Ok(())
        } else {
            Err(CryptoError::UnsupportedSecurityLevel {
                provider: self.name(),
                level,
            })
        }
    }
}

/// Post-quantum backends the registry can select between
pub enum KemBackend {
    Kyber(KyberProvider),
    Software(MlKemProvider),
    Deterministic(DeterministicProvider),
}

impl KemBackend {
    fn inner(&self) -> &dyn KemProvider {
        match self {
            KemBackend::Kyber(provider) => provider,
            KemBackend::Software(provider) => provider,
            KemBackend::Deterministic(provider) => provider,
        }
    }
}

impl KemProvider for KemBackend {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn is_production_safe(&self) -> bool {
        self.inner().is_production_safe()
    }

    fn supported_levels(&self) -> BTreeSet<u16> {
        self.inner().supported_levels()
    }

    fn generate_keypair(&self, level: u16) -> Result<KemKeyPair, CryptoError> {
        self.inner().generate_keypair(level)
    }

    fn encapsulate(&self, public_key: &[u8], level: u16) -> Result<Encapsulation, CryptoError> {
        self.inner().encapsulate(public_key, level)
    }

    fn decapsulate(
        &self,
        ciphertext: &[u8],
        private_key: &[u8],
        level: u16,
    ) -> Result<SharedSecret, CryptoError> {
        self.inner().decapsulate(ciphertext, private_key, level)
    }
}
