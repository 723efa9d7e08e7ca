// Base64 helpers shared by every wire format in the crate
// Keys, ciphertexts and envelopes travel as standard base64 strings

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{de::DeserializeOwned, Serialize};

use super::CryptoError;

/// Encode bytes as standard base64
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode a base64 string that is expected to carry key material
pub fn decode_key(data: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| CryptoError::InvalidKeyEncoding(format!("not valid base64: {}", e)))
}

/// Decode a base64 string carrying non-key data (ciphertexts, salts)
pub fn decode(data: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| CryptoError::MalformedInput(format!("not valid base64: {}", e)))
}

/// Serialize a value as JSON and wrap it in base64
pub fn encode_json<T: Serialize>(value: &T) -> Result<String, CryptoError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| CryptoError::MalformedInput(format!("serialization failed: {}", e)))?;
    Ok(encode(&json))
}

/// Reverse of [`encode_json`]
pub fn decode_json<T: DeserializeOwned>(data: &str) -> Result<T, CryptoError> {
    let json = decode(data)?;
    serde_json::from_slice(&json)
        .map_err(|e| CryptoError::MalformedInput(format!("invalid document: {}", e)))
}

/// Serde adapter storing `Vec<u8>` fields as base64 strings
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
