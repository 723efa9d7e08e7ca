// Algorithm negotiation across every device in a conversation
//
// Correctness first: the result must be unwrappable by every participant, so an empty
// intersection falls back to classical unless the deployment enforces quantum-only.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::algorithm::{Algorithm, PRIORITY_ORDER};
use crate::crypto::CryptoError;
use crate::device::DeviceCapability;

/// What to do when the participants share no algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Downgrade to classical so every device can decrypt
    #[default]
    Classical,
    /// Never negotiate classical; fail with `NoCompatibleAlgorithm` instead
    EnforceQuantumOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationResult {
    pub algorithm: Algorithm,
    pub participant_count: usize,
    /// True when no common algorithm existed and the fallback was used
    pub fell_back: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlgorithmNegotiator {
    policy: FallbackPolicy,
}

impl AlgorithmNegotiator {
    pub fn new(policy: FallbackPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// Pick one algorithm every capability set contains
    pub fn negotiate(
        &self,
        capability_sets: &[BTreeSet<Algorithm>],
        preferred: Option<Algorithm>,
    ) -> Result<NegotiationResult, CryptoError> {
        let participant_count = capability_sets.len();
        let allowed = |a: &Algorithm| match self.policy {
            FallbackPolicy::Classical => true,
            FallbackPolicy::EnforceQuantumOnly => a.is_post_quantum(),
        };

        if participant_count > 0 {
            if let Some(preferred) = preferred.filter(allowed) {
                if capability_sets.iter().all(|set| set.contains(&preferred)) {
                    debug!(algorithm = %preferred, participant_count, "preferred algorithm accepted");
                    return Ok(NegotiationResult {
                        algorithm: preferred,
                        participant_count,
                        fell_back: false,
                    });
                }
            }

            let common = intersect(capability_sets);
            if let Some(algorithm) = PRIORITY_ORDER
                .into_iter()
                .filter(allowed)
                .find(|a| common.contains(a))
            {
                debug!(algorithm = %algorithm, participant_count, "negotiated common algorithm");
                return Ok(NegotiationResult {
                    algorithm,
                    participant_count,
                    fell_back: false,
                });
            }
        }

        match self.policy {
            FallbackPolicy::Classical => {
                warn!(participant_count, "no common algorithm, falling back to classical");
                Ok(NegotiationResult {
                    algorithm: Algorithm::FALLBACK,
                    participant_count,
                    fell_back: true,
                })
            }
            FallbackPolicy::EnforceQuantumOnly => {
                warn!(participant_count, "no common post-quantum algorithm");
                Err(CryptoError::NoCompatibleAlgorithm)
            }
        }
    }

    /// Negotiate from registry declarations
    pub fn negotiate_devices(
        &self,
        devices: &[DeviceCapability],
        preferred: Option<Algorithm>,
    ) -> Result<NegotiationResult, CryptoError> {
        let sets: Vec<BTreeSet<Algorithm>> = devices.iter().map(DeviceCapability::capabilities).collect();
        self.negotiate(&sets, preferred)
    }
}

fn intersect(sets: &[BTreeSet<Algorithm>]) -> BTreeSet<Algorithm> {
    let mut iter = sets.iter();
    let first = match iter.next() {
        Some(first) => first.clone(),
        None => return BTreeSet::new(),
    };
    iter.fold(first, |acc, set| acc.intersection(set).copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use Algorithm::*;

    fn set(items: &[Algorithm]) -> BTreeSet<Algorithm> {
        items.iter().copied().collect()
    }

    fn negotiate(sets: &[BTreeSet<Algorithm>], preferred: Option<Algorithm>) -> Algorithm {
        AlgorithmNegotiator::default()
            .negotiate(sets, preferred)
            .unwrap()
            .algorithm
    }

    #[test]
    fn test_only_common_member_wins() {
        // Highest available anywhere would be kem-1024; only classical is shared
        let sets = [
            set(&[Kem1024, Kem768, Classical]),
            set(&[Kem768, Classical]),
            set(&[Hybrid, Classical]),
        ];
        let result = AlgorithmNegotiator::default().negotiate(&sets, None).unwrap();
        assert_eq!(result.algorithm, Classical);
        assert_eq!(result.participant_count, 3);
        assert!(!result.fell_back);
    }

    #[test]
    fn test_highest_priority_common_member() {
        let sets = [set(&[Kem768, Kem512]), set(&[Kem768, Hybrid]), set(&[Kem768])];
        assert_eq!(negotiate(&sets, None), Kem768);

        let sets = [set(&[Kem1024, Kem512, Hybrid]), set(&[Hybrid, Kem512])];
        assert_eq!(negotiate(&sets, None), Hybrid);
    }

    #[test]
    fn test_preferred_used_when_universal() {
        let sets = [set(&[Kem1024, Kem512]), set(&[Kem1024, Kem512])];
        assert_eq!(negotiate(&sets, Some(Kem512)), Kem512);
    }

    #[test]
    fn test_preferred_ignored_when_not_universal() {
        let sets = [set(&[Kem1024, Kem768]), set(&[Kem768])];
        assert_eq!(negotiate(&sets, Some(Kem1024)), Kem768);
    }

    #[test]
    fn test_empty_sets_fall_back() {
        let sets = [set(&[]), set(&[]), set(&[])];
        let result = AlgorithmNegotiator::default().negotiate(&sets, None).unwrap();
        assert_eq!(result.algorithm, Classical);
        assert!(result.fell_back);
    }

    #[test]
    fn test_disjoint_sets_fall_back() {
        let sets = [set(&[Kem1024]), set(&[Kem512])];
        assert_eq!(negotiate(&sets, None), Classical);
    }

    #[test]
    fn test_no_devices_fall_back() {
        let result = AlgorithmNegotiator::default()
            .negotiate(&[], Some(Kem1024))
            .unwrap();
        assert_eq!(result.algorithm, Classical);
        assert_eq!(result.participant_count, 0);
    }

    #[test]
    fn test_quantum_only_refuses_downgrade() {
        let negotiator = AlgorithmNegotiator::new(FallbackPolicy::EnforceQuantumOnly);

        let sets = [set(&[Kem1024, Classical]), set(&[Kem512, Classical])];
        assert_eq!(
            negotiator.negotiate(&sets, None).unwrap_err(),
            CryptoError::NoCompatibleAlgorithm
        );

        let sets = [set(&[Hybrid, Classical]), set(&[Hybrid, Classical])];
        assert_eq!(negotiator.negotiate(&sets, Some(Classical)).unwrap().algorithm, Hybrid);
    }

    #[test]
    fn test_negotiate_devices_from_registry_strings() {
        use crate::crypto::encoding::encode;

        let devices = vec![
            DeviceCapability::new("a", "u1", encode(b"a"))
                .unwrap()
                .with_algorithms(["kem-1024", "kem-768", "classical"]),
            DeviceCapability::new("b", "u2", encode(b"b"))
                .unwrap()
                .with_algorithms(["kem-768", "classical-4096"]),
        ];
        let result = AlgorithmNegotiator::default()
            .negotiate_devices(&devices, None)
            .unwrap();
        assert_eq!(result.algorithm, Kem768);
    }

    fn any_set() -> impl Strategy<Value = BTreeSet<Algorithm>> {
        proptest::sample::subsequence(PRIORITY_ORDER.to_vec(), 0..=PRIORITY_ORDER.len())
            .prop_map(|v| v.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_result_is_universal_or_fallback(sets in proptest::collection::vec(any_set(), 1..6)) {
            let result = AlgorithmNegotiator::default().negotiate(&sets, None).unwrap();
            if result.fell_back {
                prop_assert_eq!(result.algorithm, Classical);
                prop_assert!(intersect(&sets).is_empty());
            } else {
                prop_assert!(sets.iter().all(|s| s.contains(&result.algorithm)));
                let common = intersect(&sets);
                prop_assert!(common.iter().all(|a| a.priority() >= result.algorithm.priority()));
            }
        }
    }
}
