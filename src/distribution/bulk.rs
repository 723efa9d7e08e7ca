// Concurrent wrap/decrypt over many items
//
// Each item runs on the blocking pool; a failed item never aborts the batch.
// With a deadline, completed items are returned and the rest are reported as timed out.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::algorithm::Algorithm;
use crate::crypto::{decrypt, CryptoError, EncryptedPayload, ProviderSet, SymmetricKey};

/// Outcome of wrapping one key for many devices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWrapReport {
    /// device_id -> encrypted_key
    pub wrapped: BTreeMap<String, String>,
    pub errors: BTreeMap<String, CryptoError>,
    pub timed_out: Vec<String>,
    pub success_count: usize,
    pub total_count: usize,
}

impl BulkWrapReport {
    pub fn is_complete(&self) -> bool {
        self.success_count == self.total_count
    }
}

/// Outcome of decrypting many payloads under one key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkDecryptReport {
    /// item id -> plaintext
    pub decrypted: BTreeMap<String, Vec<u8>>,
    pub errors: BTreeMap<String, CryptoError>,
    pub timed_out: Vec<String>,
    pub success_count: usize,
    pub total_count: usize,
}

impl BulkDecryptReport {
    pub fn is_complete(&self) -> bool {
        self.success_count == self.total_count
    }
}

struct BatchOutcome<T> {
    ok: BTreeMap<String, T>,
    errors: BTreeMap<String, CryptoError>,
    timed_out: Vec<String>,
    total: usize,
}

/// Run `job` for every item concurrently, keyed by item id
async fn run_batch<I, T, F>(items: Vec<(String, I)>, deadline: Option<Instant>, job: F) -> BatchOutcome<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Result<T, CryptoError> + Send + Sync + 'static,
{
    let job = Arc::new(job);
    let mut pending = BTreeSet::new();
    let mut tasks = JoinSet::new();

    for (id, input) in items {
        if !pending.insert(id.clone()) {
            warn!(item = %id, "duplicate item id in batch, skipping");
            continue;
        }
        let job = Arc::clone(&job);
        tasks.spawn(async move {
            if deadline.map_or(false, |d| Instant::now() >= d) {
                return (id, None);
            }
            let result = match tokio::task::spawn_blocking(move || (*job)(input)).await {
                Ok(result) => result,
                Err(e) => Err(CryptoError::TaskFailed(e.to_string())),
            };
            (id, Some(result))
        });
    }

    let total = pending.len();
    let mut ok = BTreeMap::new();
    let mut errors = BTreeMap::new();

    loop {
        let next = match deadline {
            Some(deadline) => match timeout_at(deadline, tasks.join_next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(remaining = tasks.len(), "batch deadline reached");
                    tasks.abort_all();
                    break;
                }
            },
            None => tasks.join_next().await,
        };

        match next {
            None => break,
            Some(Ok((id, Some(result)))) => {
                pending.remove(&id);
                match result {
                    Ok(value) => {
                        ok.insert(id, value);
                    }
                    Err(e) => {
                        debug!(item = %id, error = %e, "batch item failed");
                        errors.insert(id, e);
                    }
                }
            }
            // Started after the deadline; stays pending
            Some(Ok((_, None))) => {}
            Some(Err(e)) => warn!(error = %e, "batch task did not complete"),
        }
    }

    BatchOutcome {
        ok,
        errors,
        timed_out: pending.into_iter().collect(),
        total,
    }
}

/// Wrap `key` for each `(device_id, public_key)` pair
pub async fn encrypt_for_participants(
    providers: Arc<ProviderSet>,
    algorithm: Algorithm,
    key: &SymmetricKey,
    recipients: Vec<(String, String)>,
    deadline: Option<Instant>,
) -> BulkWrapReport {
    let key = key.clone();
    let outcome = run_batch(recipients, deadline, move |public_key: String| {
        providers.wrap_key(algorithm, &public_key, &key)
    })
    .await;

    BulkWrapReport {
        success_count: outcome.ok.len(),
        total_count: outcome.total,
        wrapped: outcome.ok,
        errors: outcome.errors,
        timed_out: outcome.timed_out,
    }
}

/// Decrypt each `(id, payload_json)` pair under `key`
///
/// Payloads are [`EncryptedPayload`] JSON documents; unparsable ones are reported
/// as `MalformedInput` for that item.
pub async fn bulk_decrypt(
    key: &SymmetricKey,
    payloads: Vec<(String, String)>,
    deadline: Option<Instant>,
) -> BulkDecryptReport {
    let key = key.clone();
    let outcome = run_batch(payloads, deadline, move |json: String| {
        let payload: EncryptedPayload = serde_json::from_str(&json)
            .map_err(|e| CryptoError::MalformedInput(format!("payload: {}", e)))?;
        decrypt(&payload, key.as_bytes())
    })
    .await;

    BulkDecryptReport {
        success_count: outcome.ok.len(),
        total_count: outcome.total,
        decrypted: outcome.ok,
        errors: outcome.errors,
        timed_out: outcome.timed_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::crypto::encrypt_message;
    use std::time::Duration;

    fn providers() -> Arc<ProviderSet> {
        let config = CoreConfig::development();
        Arc::new(ProviderSet::probe(config.environment, &config.providers).unwrap())
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes() {
        let providers = providers();
        let key = SymmetricKey::generate().unwrap();
        let a = providers.generate_device_keys(Algorithm::Kem768).unwrap();
        let c = providers.generate_device_keys(Algorithm::Kem768).unwrap();

        let report = encrypt_for_participants(
            Arc::clone(&providers),
            Algorithm::Kem768,
            &key,
            vec![
                ("a".into(), a.public_key.clone()),
                ("b".into(), "garbage".into()),
                ("c".into(), c.public_key.clone()),
            ],
            None,
        )
        .await;

        assert_eq!(report.success_count, 2);
        assert_eq!(report.total_count, 3);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors.contains_key("b"));
        assert!(!report.is_complete());

        let unwrapped = providers
            .unwrap_key(Algorithm::Kem768, &report.wrapped["c"], &c.private_key)
            .unwrap();
        assert_eq!(unwrapped.as_bytes(), key.as_bytes());
    }

    #[tokio::test]
    async fn test_bulk_decrypt_reports_malformed_items() {
        let key = SymmetricKey::generate().unwrap();
        let one = serde_json::to_string(&encrypt_message(b"one", key.as_bytes()).unwrap()).unwrap();
        let two = serde_json::to_string(&encrypt_message(b"two", key.as_bytes()).unwrap()).unwrap();

        let report = bulk_decrypt(
            &key,
            vec![
                ("m1".into(), one),
                ("m2".into(), "not json".into()),
                ("m3".into(), two),
            ],
            None,
        )
        .await;

        assert_eq!(report.success_count, 2);
        assert_eq!(report.decrypted["m1"], b"one");
        assert_eq!(report.decrypted["m3"], b"two");
        assert!(matches!(report.errors["m2"], CryptoError::MalformedInput(_)));
    }

    #[tokio::test]
    async fn test_expired_deadline_times_everything_out() {
        let key = SymmetricKey::generate().unwrap();
        let payload = serde_json::to_string(&encrypt_message(b"late", key.as_bytes()).unwrap()).unwrap();
        let deadline = Instant::now() - Duration::from_millis(1);

        let report = bulk_decrypt(&key, vec![("m1".into(), payload)], Some(deadline)).await;

        assert_eq!(report.success_count, 0);
        assert_eq!(report.total_count, 1);
        assert_eq!(report.timed_out, vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_counted_once() {
        let key = SymmetricKey::generate().unwrap();
        let payload = serde_json::to_string(&encrypt_message(b"x", key.as_bytes()).unwrap()).unwrap();

        let report = bulk_decrypt(
            &key,
            vec![("m".into(), payload.clone()), ("m".into(), payload)],
            None,
        )
        .await;
        assert_eq!(report.total_count, 1);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let key = SymmetricKey::generate().unwrap();
        let report = bulk_decrypt(&key, Vec::new(), None).await;
        assert_eq!(report.total_count, 0);
        assert!(report.is_complete());
    }
}
