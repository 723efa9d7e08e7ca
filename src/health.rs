// Startup and periodic self-tests of the selected providers

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::HealthConfig;
use crate::crypto::{
    decrypt, encrypt_message,
    random::secure_random_bytes,
    timing::{constant_time_eq, measure},
    CryptoError, DeviceKeyPair, ProviderSet, SymmetricKey,
};

pub const CHECK_KEY_GENERATION: &str = "key_generation";
pub const CHECK_SYMMETRIC: &str = "symmetric_round_trip";
pub const CHECK_INTEGRITY: &str = "key_pair_integrity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, CheckResult>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Aggregate timings for one check across runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStats {
    pub samples: u64,
    pub failures: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

impl CheckStats {
    pub fn average_ms(&self) -> Option<u64> {
        (self.samples > 0).then(|| self.total_ms / self.samples)
    }
}

/// Caller-owned accumulator fed by [`HealthValidator::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub runs: u64,
    pub failed_runs: u64,
    pub checks: BTreeMap<String, CheckStats>,
}

impl HealthMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, report: &HealthReport) {
        self.runs += 1;
        if report.status == HealthStatus::Unhealthy {
            self.failed_runs += 1;
        }
        for (name, result) in &report.checks {
            let stats = self.checks.entry(name.clone()).or_default();
            stats.samples += 1;
            stats.total_ms = stats.total_ms.saturating_add(result.duration_ms);
            stats.max_ms = stats.max_ms.max(result.duration_ms);
            if !result.passed {
                stats.failures += 1;
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub struct HealthValidator {
    providers: Arc<ProviderSet>,
    config: HealthConfig,
}

impl HealthValidator {
    pub fn new(providers: Arc<ProviderSet>, config: HealthConfig) -> Self {
        Self { providers, config }
    }

    /// Run every check once and fold the results into `metrics`
    pub fn run(&self, metrics: &mut HealthMetrics) -> HealthReport {
        let mut report = HealthReport {
            status: HealthStatus::Healthy,
            checks: BTreeMap::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        };

        if !self.providers.is_production_safe() {
            report.warnings.push(format!(
                "insecure key provider '{}' is active",
                self.providers.kind()
            ));
        }

        let algorithm = self.config.algorithm;
        let (keys, elapsed) = measure(|| self.providers.generate_device_keys(algorithm));
        let keys = self.finish(
            &mut report,
            CHECK_KEY_GENERATION,
            keys,
            elapsed,
            self.config.slow_key_generation_ms,
        );

        let (round_trip, elapsed) = measure(symmetric_round_trip);
        self.finish(
            &mut report,
            CHECK_SYMMETRIC,
            round_trip,
            elapsed,
            self.config.slow_symmetric_ms,
        );

        match keys {
            Some(keys) => {
                let (integrity, elapsed) = measure(|| self.key_pair_integrity(&keys));
                self.finish(
                    &mut report,
                    CHECK_INTEGRITY,
                    integrity,
                    elapsed,
                    self.config.slow_integrity_ms,
                );
            }
            None => {
                report.checks.insert(
                    CHECK_INTEGRITY.to_string(),
                    CheckResult {
                        passed: false,
                        duration_ms: 0,
                        detail: Some("skipped: no key pair".to_string()),
                    },
                );
                report.errors.push(format!("{}: skipped, key generation failed", CHECK_INTEGRITY));
            }
        }

        // Warnings never change the status
        report.status = if report.errors.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        if !report.warnings.is_empty() {
            warn!(warnings = ?report.warnings, "health check raised warnings");
        }
        match report.status {
            HealthStatus::Healthy => info!(algorithm = %algorithm, "health check passed"),
            HealthStatus::Unhealthy => error!(errors = ?report.errors, "health check failed"),
        }

        metrics.record(&report);
        report
    }

    /// Record one check outcome; returns the value on success
    fn finish<T>(
        &self,
        report: &mut HealthReport,
        name: &str,
        outcome: Result<T, CryptoError>,
        elapsed: Duration,
        slow_ms: u64,
    ) -> Option<T> {
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if duration_ms > slow_ms {
            report
                .warnings
                .push(format!("{} took {} ms (threshold {} ms)", name, duration_ms, slow_ms));
        }

        let (value, result) = match outcome {
            Ok(value) => (
                Some(value),
                CheckResult {
                    passed: true,
                    duration_ms,
                    detail: None,
                },
            ),
            Err(e) => {
                report.errors.push(format!("{}: {}", name, e));
                (
                    None,
                    CheckResult {
                        passed: false,
                        duration_ms,
                        detail: Some(e.to_string()),
                    },
                )
            }
        };
        report.checks.insert(name.to_string(), result);
        value
    }

    /// Wrap a throwaway key for the fresh public key and recover it with the private key
    fn key_pair_integrity(&self, keys: &DeviceKeyPair) -> Result<(), CryptoError> {
        let probe = SymmetricKey::generate()?;
        let wrapped = self
            .providers
            .wrap_key(keys.algorithm, &keys.public_key, &probe)?;
        let recovered = self
            .providers
            .unwrap_key(keys.algorithm, &wrapped, &keys.private_key)?;

        if constant_time_eq(probe.as_bytes(), recovered.as_bytes()) {
            Ok(())
        } else {
            Err(CryptoError::IntegrityMismatch)
        }
    }
}

fn symmetric_round_trip() -> Result<(), CryptoError> {
    let key = SymmetricKey::generate()?;
    let plaintext = secure_random_bytes(64)?;
    let payload = encrypt_message(&plaintext, key.as_bytes())?;
    let decrypted = decrypt(&payload, key.as_bytes())?;

    if constant_time_eq(&plaintext, &decrypted) {
        Ok(())
    } else {
        Err(CryptoError::IntegrityMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Algorithm;
    use crate::config::{CoreConfig, Environment, ProviderConfig};
    use crate::crypto::kem::registry::ProviderKind;

    fn providers(kind: ProviderKind) -> Arc<ProviderSet> {
        let config = ProviderConfig {
            preference: vec![kind],
            ..CoreConfig::development().providers
        };
        Arc::new(ProviderSet::probe(Environment::Development, &config).unwrap())
    }

    #[test]
    fn test_healthy_with_kyber() {
        let validator = HealthValidator::new(providers(ProviderKind::Kyber), HealthConfig::default());
        let mut metrics = HealthMetrics::new();

        let report = validator.run(&mut metrics);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.checks.len(), 3);
        assert!(report.checks.values().all(|c| c.passed));
        assert_eq!(metrics.runs, 1);
        assert_eq!(metrics.failed_runs, 0);
        assert_eq!(metrics.checks[CHECK_SYMMETRIC].samples, 1);
    }

    #[test]
    fn test_insecure_provider_only_warns() {
        let validator = HealthValidator::new(providers(ProviderKind::Deterministic), HealthConfig::default());
        let report = validator.run(&mut HealthMetrics::new());

        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.errors.is_empty());
        assert!(report.warnings.iter().any(|w| w.contains("deterministic")));
    }

    #[test]
    fn test_slow_checks_warn_but_stay_healthy() {
        let strict = HealthConfig {
            algorithm: Algorithm::Kem512,
            slow_key_generation_ms: 0,
            slow_symmetric_ms: 0,
            slow_integrity_ms: 0,
        };
        let validator = HealthValidator::new(providers(ProviderKind::Kyber), strict);
        let mut metrics = HealthMetrics::new();
        let report = validator.run(&mut metrics);

        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.errors.is_empty());
        assert!(report.checks.values().all(|c| c.passed));
        assert_eq!(metrics.failed_runs, 0);
    }

    #[test]
    fn test_relaxed_thresholds_raise_no_warnings() {
        let relaxed = HealthConfig {
            algorithm: Algorithm::Kem512,
            slow_key_generation_ms: u64::MAX,
            slow_symmetric_ms: u64::MAX,
            slow_integrity_ms: u64::MAX,
        };
        let validator = HealthValidator::new(providers(ProviderKind::Kyber), relaxed);
        let report = validator.run(&mut HealthMetrics::new());
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.warnings.is_empty());
        assert!(report.is_healthy());
    }

    #[test]
    fn test_metrics_accumulate_and_reset() {
        let validator = HealthValidator::new(providers(ProviderKind::Deterministic), HealthConfig::default());
        let mut metrics = HealthMetrics::new();

        validator.run(&mut metrics);
        validator.run(&mut metrics);
        assert_eq!(metrics.runs, 2);
        assert_eq!(metrics.checks[CHECK_KEY_GENERATION].samples, 2);
        assert!(metrics.checks[CHECK_KEY_GENERATION].average_ms().is_some());

        metrics.reset();
        assert_eq!(metrics, HealthMetrics::default());
    }

    #[test]
    fn test_report_serializes() {
        let validator = HealthValidator::new(providers(ProviderKind::Deterministic), HealthConfig::default());
        let report = validator.run(&mut HealthMetrics::new());
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["checks"][CHECK_SYMMETRIC]["passed"], true);
    }
}
