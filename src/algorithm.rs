// Key-establishment algorithm identifiers and their negotiation priority

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::CryptoError;

/// Algorithm a conversation key is wrapped with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Algorithm {
    /// RSA-OAEP only
    #[serde(rename = "classical")]
    Classical,

    /// Kyber-512 (NIST level 1)
    #[serde(rename = "kem-512")]
    Kem512,

    /// RSA-OAEP combined with Kyber
    #[serde(rename = "hybrid")]
    Hybrid,

    /// Kyber-768 (NIST level 3)
    #[serde(rename = "kem-768")]
    Kem768,

    /// Kyber-1024 (NIST level 5)
    #[serde(rename = "kem-1024")]
    Kem1024,
}

/// Strongest first; negotiation picks the first common entry
pub const PRIORITY_ORDER: [Algorithm; 5] = [
    Algorithm::Kem1024,
    Algorithm::Kem768,
    Algorithm::Hybrid,
    Algorithm::Kem512,
    Algorithm::Classical,
];

impl Algorithm {
    /// Universally implementable fallback
    pub const FALLBACK: Algorithm = Algorithm::Classical;

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Classical => "classical",
            Algorithm::Kem512 => "kem-512",
            Algorithm::Hybrid => "hybrid",
            Algorithm::Kem768 => "kem-768",
            Algorithm::Kem1024 => "kem-1024",
        }
    }

    /// Position in [`PRIORITY_ORDER`]; lower is stronger
    pub fn priority(self) -> usize {
        PRIORITY_ORDER
            .iter()
            .position(|a| *a == self)
            .unwrap_or(PRIORITY_ORDER.len())
    }

    /// Kyber parameter set of a pure KEM algorithm
    ///
    /// Hybrid keys carry their level in the key document instead.
    pub fn kem_level(self) -> Option<u16> {
        match self {
            Algorithm::Kem512 => Some(512),
            Algorithm::Kem768 => Some(768),
            Algorithm::Kem1024 => Some(1024),
            Algorithm::Classical | Algorithm::Hybrid => None,
        }
    }

    /// True when breaking the scheme requires breaking a post-quantum primitive
    pub fn is_post_quantum(self) -> bool {
        self != Algorithm::Classical
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classical" | "classical-2048" | "classical-3072" | "classical-4096" | "rsa-oaep" => {
                Ok(Algorithm::Classical)
            }
            "kem-512" | "kyber512" => Ok(Algorithm::Kem512),
            "kem-768" | "kyber768" => Ok(Algorithm::Kem768),
            "kem-1024" | "kyber1024" => Ok(Algorithm::Kem1024),
            "hybrid" => Ok(Algorithm::Hybrid),
            other => Err(CryptoError::MalformedInput(format!(
                "unknown algorithm identifier: {}",
                other
            ))),
        }
    }
}
