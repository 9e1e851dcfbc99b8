//! Key-value backend adapter.
//!
//! DESIGN
//! ======
//! Every store in the service talks to a single [`KvStore`] trait object.
//! Two implementations exist: [`MemoryStore`] (process-local, resets on
//! restart) and [`UpstashStore`] (Upstash Redis over its REST API). The
//! backend is chosen once in `main` from configuration; business logic never
//! branches on which one is active.
//!
//! The data model mirrors Redis: string values, sets, and integer hashes.
//! Reading a key through the wrong accessor fails with
//! [`KvError::WrongType`] on both backends so repair logic behaves the same
//! everywhere.

pub mod memory;
pub mod upstash;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use memory::MemoryStore;
pub use upstash::UpstashStore;

use crate::config::AppConfig;
use crate::error::ErrorCode;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("operation against a key holding the wrong kind of value: {key}")]
    WrongType { key: String },
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("backend returned error: {0}")]
    Backend(String),
    #[error("unexpected backend response: {0}")]
    Protocol(String),
    #[error("stored value could not be decoded: {0}")]
    Decode(String),
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ErrorCode for KvError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::WrongType { .. } => "E_KV_WRONG_TYPE",
            Self::Request(_) => "E_KV_REQUEST",
            Self::Backend(_) => "E_KV_BACKEND",
            Self::Protocol(_) => "E_KV_PROTOCOL",
            Self::Decode(_) => "E_KV_DECODE",
            Self::HttpClientBuild(_) => "E_KV_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Backend(_))
    }
}

// =============================================================================
// KEY TYPES
// =============================================================================

/// Kind of value stored under a key, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyType {
    None,
    String,
    Set,
    Hash,
    Other(String),
}

impl KeyType {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "none" => Self::None,
            "string" => Self::String,
            "set" => Self::Set,
            "hash" => Self::Hash,
            other => Self::Other(other.to_owned()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::String => "string",
            Self::Set => "set",
            Self::Hash => "hash",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
}

// =============================================================================
// STORE TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    /// Write `value` only if `key` does not exist, expiring it after `ttl`.
    /// Returns whether this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;
    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;
    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    async fn members_of(&self, set_key: &str) -> Result<Vec<String>, KvError>;
    async fn add_member(&self, set_key: &str, member: &str) -> Result<(), KvError>;
    async fn remove_member(&self, set_key: &str, member: &str) -> Result<(), KvError>;

    async fn type_of(&self, key: &str) -> Result<KeyType, KvError>;
    /// All keys starting with `prefix`, in no particular order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;

    /// Increment an integer field of a hash, creating both as needed.
    async fn incr_field(&self, key: &str, field: &str, by: i64) -> Result<i64, KvError>;
    async fn fields_of(&self, key: &str) -> Result<HashMap<String, i64>, KvError>;

    /// Atomically replace the string at `key` with `new` (or delete it when
    /// `new` is `None`) if and only if it currently equals `expected`.
    async fn compare_and_swap(&self, key: &str, expected: &str, new: Option<&str>) -> Result<bool, KvError>;
}

pub type SharedKv = Arc<dyn KvStore>;

/// Select the backend once at startup: Upstash when both REST URL and token
/// are configured, memory otherwise.
///
/// # Errors
///
/// Returns an error if the Upstash HTTP client cannot be built.
pub fn from_config(config: &AppConfig) -> Result<SharedKv, KvError> {
    match (&config.upstash_url, &config.upstash_token) {
        (Some(url), Some(token)) => {
            let store = UpstashStore::new(url, token, config.kv_request_timeout_secs)?;
            Ok(Arc::new(store))
        }
        _ => Ok(Arc::new(MemoryStore::new())),
    }
}

// =============================================================================
// JSON RECORDS
// =============================================================================

/// Read and decode a JSON record.
///
/// # Errors
///
/// Returns backend errors, or [`KvError::Decode`] when the stored string is
/// not a valid record of type `T`.
pub async fn get_json<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Result<Option<T>, KvError> {
    let Some(raw) = kv.get(key).await? else {
        return Ok(None);
    };
    decode_json(&raw).map(Some)
}

/// Encode and write a JSON record.
///
/// # Errors
///
/// Returns backend errors from the write.
pub async fn set_json<T: Serialize>(kv: &dyn KvStore, key: &str, value: &T) -> Result<(), KvError> {
    let raw = encode_json(value)?;
    kv.set(key, &raw).await
}

pub(crate) fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<T, KvError> {
    serde_json::from_str(raw).map_err(|e| KvError::Decode(e.to_string()))
}

pub(crate) fn encode_json<T: Serialize>(value: &T) -> Result<String, KvError> {
    serde_json::to_string(value).map_err(|e| KvError::Decode(e.to_string()))
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
