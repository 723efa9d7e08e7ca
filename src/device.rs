// Device capability declarations consumed from the external device registry

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::algorithm::Algorithm;
use crate::crypto::{encoding::decode_key, CryptoError};

/// A participant device as known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapability {
    pub device_id: String,
    pub user_id: String,
    /// Lowercase hex SHA-256 of the decoded primary public key
    pub fingerprint: String,
    /// Primary public key (base64)
    pub public_key: String,
    /// Algorithm identifiers the device can unwrap with
    pub declared_algorithms: BTreeSet<String>,
    /// Keys for devices that hold a distinct keypair per algorithm
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub algorithm_keys: BTreeMap<Algorithm, String>,
    /// Registry fingerprint of each entry in `algorithm_keys`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_fingerprints: BTreeMap<Algorithm, String>,
}

/// Fingerprint of a base64-encoded public key
pub fn fingerprint_of(public_key: &str) -> Result<String, CryptoError> {
    let bytes = decode_key(public_key)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

impl DeviceCapability {
    /// Register a device, computing its fingerprint
    pub fn new(
        device_id: impl Into<String>,
        user_id: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Result<Self, CryptoError> {
        let public_key = public_key.into();
        Ok(Self {
            device_id: device_id.into(),
            user_id: user_id.into(),
            fingerprint: fingerprint_of(&public_key)?,
            public_key,
            declared_algorithms: BTreeSet::new(),
            algorithm_keys: BTreeMap::new(),
            key_fingerprints: BTreeMap::new(),
        })
    }

    pub fn with_algorithms<I, S>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared_algorithms
            .extend(algorithms.into_iter().map(Into::into));
        self
    }

    /// Attach a dedicated key for `algorithm`, declare it and record its fingerprint
    pub fn with_algorithm_key(
        mut self,
        algorithm: Algorithm,
        public_key: impl Into<String>,
    ) -> Result<Self, CryptoError> {
        let public_key = public_key.into();
        self.key_fingerprints
            .insert(algorithm, fingerprint_of(&public_key)?);
        self.declared_algorithms.insert(algorithm.as_str().to_string());
        self.algorithm_keys.insert(algorithm, public_key);
        Ok(self)
    }

    /// Parsed capability set; unknown identifiers are ignored
    pub fn capabilities(&self) -> BTreeSet<Algorithm> {
        parse_capabilities(&self.declared_algorithms)
    }

    /// Key to wrap with when `algorithm` was negotiated
    pub fn public_key_for(&self, algorithm: Algorithm) -> &str {
        self.algorithm_keys
            .get(&algorithm)
            .map(String::as_str)
            .unwrap_or(&self.public_key)
    }

    /// Check the registry fingerprint against the primary public key
    pub fn verify_fingerprint(&self) -> Result<(), CryptoError> {
        self.check(&self.public_key, Some(&self.fingerprint))
    }

    /// Key to wrap with for `algorithm`, after checking it against its registry fingerprint
    ///
    /// The primary key is always checked; a dedicated algorithm key must also match
    /// its own entry in `key_fingerprints`.
    pub fn verified_key_for(&self, algorithm: Algorithm) -> Result<&str, CryptoError> {
        self.verify_fingerprint()?;
        match self.algorithm_keys.get(&algorithm) {
            Some(key) => {
                self.check(key, self.key_fingerprints.get(&algorithm))?;
                Ok(key.as_str())
            }
            None => Ok(&self.public_key),
        }
    }

    fn check(&self, public_key: &str, expected: Option<&String>) -> Result<(), CryptoError> {
        let mismatch = || CryptoError::FingerprintMismatch(self.device_id.clone());
        let expected = expected.ok_or_else(mismatch)?;
        let actual = fingerprint_of(public_key).map_err(|_| mismatch())?;
        if actual.eq_ignore_ascii_case(expected.trim()) {
            Ok(())
        } else {
            Err(mismatch())
        }
    }
}

/// Parse registry identifier strings, skipping ones this build does not know
pub fn parse_capabilities<'a, I>(declared: I) -> BTreeSet<Algorithm>
where
    I: IntoIterator<Item = &'a String>,
{
    declared
        .into_iter()
        .filter_map(|id| match id.parse::<Algorithm>() {
            Ok(algorithm) => Some(algorithm),
            Err(_) => {
                debug!(identifier = %id, "ignoring unknown capability identifier");
                None
            }
        })
        .collect()
}
