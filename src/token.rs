//! Checkpoint token and callback id encoding.
//!
//! Both are opaque to clients: JSON documents encoded as URL-safe base64
//! without padding.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

/// Data contained in a checkpoint token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointToken {
    /// The execution this token gates
    #[serde(rename = "arn")]
    pub execution_arn: String,
    /// Monotonic sequence number at issue time
    #[serde(rename = "seq")]
    pub token_sequence: u64,
}

impl CheckpointToken {
    pub fn new(execution_arn: impl Into<String>, token_sequence: u64) -> Self {
        Self {
            execution_arn: execution_arn.into(),
            token_sequence,
        }
    }

    /// Encode to the opaque string form.
    pub fn encode(&self) -> String {
        encode(self)
    }

    /// Decode from the opaque string form.
    pub fn decode(token: &str) -> ServiceResult<Self> {
        decode(token)
    }
}

/// Data contained in a callback id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackToken {
    /// The execution owning the callback
    #[serde(rename = "arn")]
    pub execution_arn: String,
    /// The CALLBACK operation id
    #[serde(rename = "op")]
    pub operation_id: String,
}

impl CallbackToken {
    pub fn new(execution_arn: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            execution_arn: execution_arn.into(),
            operation_id: operation_id.into(),
        }
    }

    /// Encode to the opaque callback id handed to external systems.
    pub fn encode(&self) -> String {
        encode(self)
    }

    /// Decode a callback id.
    pub fn decode(callback_id: &str) -> ServiceResult<Self> {
        decode(callback_id)
    }
}

fn encode<T: Serialize>(data: &T) -> String {
    // Both token types are plain string/integer structs; serialization cannot fail.
    let json = serde_json::to_string(data).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json.as_bytes())
}

fn decode<T: DeserializeOwned>(token: &str) -> ServiceResult<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| ServiceError::invalid_parameter(format!("base64 decode error: {}", e)))?;

    let json = String::from_utf8(bytes)
        .map_err(|e| ServiceError::invalid_parameter(format!("utf8 decode error: {}", e)))?;

    serde_json::from_str(&json)
        .map_err(|e| ServiceError::invalid_parameter(format!("json parse error: {}", e)))
}
