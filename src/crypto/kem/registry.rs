// Runtime provider selection
// Candidates are probed in configured order; the first one passing a self-test wins

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    DeterministicProvider, KemBackend, KemProvider, KyberProvider, MlKemProvider, RsaOaepProvider,
};
use crate::algorithm::Algorithm;
use crate::config::{Environment, ProviderConfig};
use crate::crypto::{hybrid::HybridCombiner, timing::constant_time_eq, CryptoError};

/// Post-quantum backend candidates, in the order a deployment prefers them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Native PQClean Kyber implementation
    Kyber,
    /// Pure-Rust ML-KEM, used when the native build is missing or broken
    Software,
    /// Insecure hash-based stand-in, development only
    Deterministic,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Kyber => f.write_str("kyber"),
            ProviderKind::Software => f.write_str("software"),
            ProviderKind::Deterministic => f.write_str("deterministic"),
        }
    }
}

/// The providers selected for this process
pub struct ProviderSet {
    classical: RsaOaepProvider,
    kem: KemBackend,
    kind: ProviderKind,
    classical_key_bits: u16,
    hybrid_kem_level: u16,
}

impl ProviderSet {
    /// Probe candidates in preference order and keep the first healthy one
    pub fn probe(environment: Environment, config: &ProviderConfig) -> Result<Self, CryptoError> {
        for &kind in &config.preference {
            if kind == ProviderKind::Deterministic && environment == Environment::Production {
                warn!(provider = %kind, "skipping insecure provider in production");
                continue;
            }

            let backend = instantiate(kind);
            match self_test(&backend) {
                Ok(()) => {
                    if !backend.is_production_safe() {
                        warn!(provider = backend.name(), "using INSECURE key provider");
                    } else {
                        info!(provider = backend.name(), "key provider selected");
                    }
                    return Ok(Self::with_backend(kind, backend, config));
                }
                Err(e) => {
                    warn!(provider = %kind, error = %e, "provider failed self-test, trying next");
                }
            }
        }

        Err(CryptoError::ProviderUnavailable(format!(
            "none of {:?} passed the self-test",
            config.preference
        )))
    }

    /// Use a specific backend without probing
    pub fn with_backend(kind: ProviderKind, kem: KemBackend, config: &ProviderConfig) -> Self {
        Self {
            classical: RsaOaepProvider::new(),
            kem,
            kind,
            classical_key_bits: config.classical_key_bits,
            hybrid_kem_level: config.hybrid_kem_level,
        }
    }

    pub fn kem(&self) -> &KemBackend {
        &self.kem
    }

    pub fn classical(&self) -> &RsaOaepProvider {
        &self.classical
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn is_production_safe(&self) -> bool {
        self.kem.is_production_safe()
    }

    pub fn classical_key_bits(&self) -> u16 {
        self.classical_key_bits
    }

    pub fn hybrid(&self) -> HybridCombiner<'_> {
        HybridCombiner::new(&self.classical, &self.kem, self.classical_key_bits, self.hybrid_kem_level)
    }

    /// Security-level integer stored on key records
    pub fn key_strength(&self, algorithm: Algorithm) -> u32 {
        match algorithm {
            Algorithm::Classical => u32::from(self.classical_key_bits),
            Algorithm::Hybrid => u32::from(self.hybrid_kem_level),
            other => other.kem_level().map(u32::from).unwrap_or_default(),
        }
    }
}

fn instantiate(kind: ProviderKind) -> KemBackend {
    match kind {
        ProviderKind::Kyber => KemBackend::Kyber(KyberProvider::new()),
        ProviderKind::Software => KemBackend::Software(MlKemProvider::new()),
        ProviderKind::Deterministic => KemBackend::Deterministic(DeterministicProvider::new()),
    }
}

/// Encapsulate/decapsulate round trip at the smallest supported level
fn self_test(backend: &KemBackend) -> Result<(), CryptoError> {
    let level = backend
        .supported_levels()
        .into_iter()
        .next()
        .ok_or_else(|| CryptoError::ProviderUnavailable("provider reports no levels".to_string()))?;

    let keypair = backend.generate_keypair(level)?;
    let encapsulation = backend.encapsulate(&keypair.public_key, level)?;
    let recovered = backend.decapsulate(&encapsulation.ciphertext, keypair.private_key(), level)?;

    if !constant_time_eq(encapsulation.shared_secret.as_bytes(), recovered.as_bytes()) {
        return Err(CryptoError::KeyExchangeError("self-test secrets differ".to_string()));
    }

    debug!(provider = backend.name(), level, "provider self-test passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(preference: Vec<ProviderKind>) -> ProviderConfig {
        ProviderConfig {
            preference,
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn test_prefers_first_candidate() {
        let set = ProviderSet::probe(
            Environment::Development,
            &config(vec![ProviderKind::Kyber, ProviderKind::Deterministic]),
        )
        .unwrap();
        assert_eq!(set.kind(), ProviderKind::Kyber);
        assert!(set.is_production_safe());
    }

    #[test]
    fn test_default_order_is_native_then_software() {
        assert_eq!(
            ProviderConfig::default().preference,
            vec![ProviderKind::Kyber, ProviderKind::Software]
        );
        assert_eq!(
            crate::config::CoreConfig::development().providers.preference,
            vec![ProviderKind::Kyber, ProviderKind::Software, ProviderKind::Deterministic]
        );
    }

    #[test]
    fn test_software_backend_selected_when_listed_first() {
        let set = ProviderSet::probe(
            Environment::Development,
            &config(vec![ProviderKind::Software, ProviderKind::Deterministic]),
        )
        .unwrap();
        assert_eq!(set.kind(), ProviderKind::Software);
        assert!(set.is_production_safe());
        assert_eq!(set.kem().name(), "rustcrypto-ml-kem");
    }

    #[test]
    fn test_production_falls_through_to_software() {
        let set = ProviderSet::probe(
            Environment::Production,
            &config(vec![ProviderKind::Deterministic, ProviderKind::Software]),
        )
        .unwrap();
        assert_eq!(set.kind(), ProviderKind::Software);
    }

    #[test]
    fn test_software_backend_wraps_every_kem_level() {
        let set = ProviderSet::probe(Environment::Development, &config(vec![ProviderKind::Software]))
            .unwrap();
        let key = crate::crypto::SymmetricKey::generate().unwrap();

        for algorithm in [Algorithm::Kem512, Algorithm::Kem768, Algorithm::Kem1024] {
            let device = set.generate_device_keys(algorithm).unwrap();
            let wrapped = set.wrap_key(algorithm, &device.public_key, &key).unwrap();
            let unwrapped = set.unwrap_key(algorithm, &wrapped, &device.private_key).unwrap();
            assert_eq!(unwrapped.as_bytes(), key.as_bytes(), "{}", algorithm);
        }
    }

    #[test]
    fn test_deterministic_allowed_in_development() {
        let set = ProviderSet::probe(
            Environment::Development,
            &config(vec![ProviderKind::Deterministic]),
        )
        .unwrap();
        assert_eq!(set.kind(), ProviderKind::Deterministic);
        assert!(!set.is_production_safe());
    }

    #[test]
    fn test_deterministic_rejected_in_production() {
        let result = ProviderSet::probe(
            Environment::Production,
            &config(vec![ProviderKind::Deterministic]),
        );
        assert!(matches!(result, Err(CryptoError::ProviderUnavailable(_))));
    }

    #[test]
    fn test_empty_preference_is_unavailable() {
        let result = ProviderSet::probe(Environment::Development, &config(vec![]));
        assert!(matches!(result, Err(CryptoError::ProviderUnavailable(_))));
    }

    #[test]
    fn test_key_strength() {
        let set = ProviderSet::probe(Environment::Development, &config(vec![ProviderKind::Kyber]))
            .unwrap();
        assert_eq!(set.key_strength(Algorithm::Kem1024), 1024);
        assert_eq!(set.key_strength(Algorithm::Hybrid), 768);
        assert_eq!(
            set.key_strength(Algorithm::Classical),
            u32::from(ProviderConfig::default().classical_key_bits)
        );
    }
}
