// Hybrid key establishment: RSA-OAEP and Kyber combined into one secret
//
// Keys and ciphertexts travel as base64(JSON{version, algorithm, components: {classical, kem}}).
// `algorithm` is a closed tag set; unknown tags and versions are rejected, so adding a
// scheme never changes how existing documents parse.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{
    encoding::{decode_key, encode},
    kdf::combine_secrets,
    kem::{KemBackend, KemProvider, RsaOaepProvider, SharedSecret},
    CryptoError,
};

pub const HYBRID_FORMAT_VERSION: u8 = 1;

/// Tag identifying which primitives a hybrid document combines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HybridScheme {
    #[serde(rename = "rsa-oaep+kem-768")]
    RsaOaepKem768,
    #[serde(rename = "rsa-oaep+kem-1024")]
    RsaOaepKem1024,
}

impl HybridScheme {
    pub fn for_kem_level(level: u16) -> Result<Self, CryptoError> {
        match level {
            768 => Ok(HybridScheme::RsaOaepKem768),
            1024 => Ok(HybridScheme::RsaOaepKem1024),
            other => Err(CryptoError::UnsupportedSecurityLevel {
                provider: "hybrid",
                level: other,
            }),
        }
    }

    pub fn kem_level(self) -> u16 {
        match self {
            HybridScheme::RsaOaepKem768 => 768,
            HybridScheme::RsaOaepKem1024 => 1024,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct HybridDocument {
    version: u8,
    algorithm: HybridScheme,
    components: HybridComponents,
}

#[derive(Serialize, Deserialize)]
struct HybridComponents {
    classical: String,
    kem: String,
}

struct ParsedDocument {
    scheme: HybridScheme,
    classical: Zeroizing<Vec<u8>>,
    kem: Zeroizing<Vec<u8>>,
}

fn encode_document(scheme: HybridScheme, classical: &[u8], kem: &[u8]) -> Result<String, CryptoError> {
    let document = HybridDocument {
        version: HYBRID_FORMAT_VERSION,
        algorithm: scheme,
        components: HybridComponents {
            classical: encode(classical),
            kem: encode(kem),
        },
    };
    let json = Zeroizing::new(
        serde_json::to_vec(&document)
            .map_err(|e| CryptoError::InvalidKeyEncoding(format!("hybrid document: {}", e)))?,
    );
    Ok(encode(&json))
}

fn parse_document(encoded: &str) -> Result<ParsedDocument, CryptoError> {
    let json = Zeroizing::new(decode_key(encoded)?);
    let document: HybridDocument = serde_json::from_slice(&json)
        .map_err(|e| CryptoError::InvalidKeyEncoding(format!("hybrid document: {}", e)))?;

    if document.version != HYBRID_FORMAT_VERSION {
        return Err(CryptoError::InvalidKeyEncoding(format!(
            "unsupported hybrid document version {}",
            document.version
        )));
    }

    Ok(ParsedDocument {
        scheme: document.algorithm,
        classical: Zeroizing::new(decode_key(&document.components.classical)?),
        kem: Zeroizing::new(decode_key(&document.components.kem)?),
    })
}

/// Combine a classical and a KEM public key into one hybrid public key
pub fn combine_public_keys(
    scheme: HybridScheme,
    classical_public: &[u8],
    kem_public: &[u8],
) -> Result<String, CryptoError> {
    encode_document(scheme, classical_public, kem_public)
}

/// Scheme tag of an encoded hybrid key or ciphertext
pub fn scheme_of(encoded: &str) -> Result<HybridScheme, CryptoError> {
    Ok(parse_document(encoded)?.scheme)
}

/// Matching hybrid public/private documents
pub struct HybridKeyPair {
    pub public_key: String,
    pub private_key: Zeroizing<String>,
}

/// Result of a hybrid encapsulation
pub struct HybridEncapsulation {
    pub ciphertext: String,
    pub shared_secret: SharedSecret,
}

/// Composes the classical provider with the selected KEM backend
pub struct HybridCombiner<'a> {
    classical: &'a RsaOaepProvider,
    kem: &'a KemBackend,
    classical_bits: u16,
    kem_level: u16,
}

impl<'a> HybridCombiner<'a> {
    pub fn new(
        classical: &'a RsaOaepProvider,
        kem: &'a KemBackend,
        classical_bits: u16,
        kem_level: u16,
    ) -> Self {
        Self {
            classical,
            kem,
            classical_bits,
            kem_level,
        }
    }

    /// Generate both halves and package them as hybrid documents
    pub fn generate_keypair(&self) -> Result<HybridKeyPair, CryptoError> {
        let scheme = HybridScheme::for_kem_level(self.kem_level)?;
        let classical = self.classical.generate_keypair(self.classical_bits)?;
        let kem = self.kem.generate_keypair(scheme.kem_level())?;

        Ok(HybridKeyPair {
            public_key: combine_public_keys(scheme, &classical.public_key, &kem.public_key)?,
            private_key: Zeroizing::new(encode_document(
                scheme,
                classical.private_key(),
                kem.private_key(),
            )?),
        })
    }

    /// `shared_secret = SHA-256(classical_secret || kem_secret)`
    pub fn encapsulate_hybrid(&self, hybrid_public_key: &str) -> Result<HybridEncapsulation, CryptoError> {
        let public = parse_document(hybrid_public_key)?;

        let classical_level = RsaOaepProvider::level_of_public_key(&public.classical)?;
        let classical = self.classical.encapsulate(&public.classical, classical_level)?;
        let kem = self.kem.encapsulate(&public.kem, public.scheme.kem_level())?;

        Ok(HybridEncapsulation {
            ciphertext: encode_document(public.scheme, &classical.ciphertext, &kem.ciphertext)?,
            shared_secret: combine_secrets(&classical.shared_secret, &kem.shared_secret),
        })
    }

    pub fn decapsulate_hybrid(
        &self,
        hybrid_ciphertext: &str,
        hybrid_private_key: &str,
    ) -> Result<SharedSecret, CryptoError> {
        let ciphertext = parse_document(hybrid_ciphertext)?;
        let private = parse_document(hybrid_private_key)?;

        if ciphertext.scheme != private.scheme {
            return Err(CryptoError::InvalidKeyEncoding(format!(
                "ciphertext scheme {:?} does not match key scheme {:?}",
                ciphertext.scheme, private.scheme
            )));
        }

        let classical = self.classical.decapsulate(
            &ciphertext.classical,
            &private.classical,
            RsaOaepProvider::level_of_ciphertext(&ciphertext.classical)?,
        )?;
        let kem = self
            .kem
            .decapsulate(&ciphertext.kem, &private.kem, private.scheme.kem_level())?;

        Ok(combine_secrets(&classical, &kem))
    }
}
