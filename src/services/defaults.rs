//! Global defaults: the allowance auto-granted to first-seen visitors.
//!
//! Resolution order for reads:
//!   1) persisted record in the KV store
//!   2) value set earlier in this process
//!   3) built-in values (`DEFAULT_MINUTES` / `DEFAULT_USES`, else 60 / 5)
//!
//! Writes update the in-process copy first, then write through best-effort,
//! so a save is visible immediately even if the store is unreachable.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::overrides::OverrideGrant;
use crate::config::AppConfig;
use crate::error::ErrorCode;
use crate::kv::{self, SharedKv};

pub const DEFAULTS_KEY: &str = "settings:global-defaults:v1";

pub const BUILTIN_DEFAULT_MINUTES: u32 = 60;
pub const BUILTIN_DEFAULT_USES: u32 = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DefaultsError {
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("{field} must be a non-negative integer")]
    Invalid { field: &'static str },
}

impl ErrorCode for DefaultsError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing { .. } => "E_MISSING_FIELD",
            Self::Invalid { .. } => "E_INVALID_FIELD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalDefaults {
    pub default_minutes: u32,
    pub default_uses: u32,
}

impl GlobalDefaults {
    #[must_use]
    pub fn builtin(config: &AppConfig) -> Self {
        Self {
            default_minutes: config.default_minutes.unwrap_or(BUILTIN_DEFAULT_MINUTES),
            default_uses: config.default_uses.unwrap_or(BUILTIN_DEFAULT_USES),
        }
    }

    /// Parse loosely-typed admin input. Accepts integers, whole floats, and
    /// numeric strings; rejects anything negative, fractional, or missing.
    ///
    /// # Errors
    ///
    /// Returns which field was missing or invalid.
    pub fn from_input(minutes: Option<&Value>, uses: Option<&Value>) -> Result<Self, DefaultsError> {
        Ok(Self {
            default_minutes: parse_count(minutes, "defaultMinutes")?,
            default_uses: parse_count(uses, "defaultUses")?,
        })
    }

    /// The grant handed to first-seen visitors. Zero on either axis turns
    /// the allowance off.
    #[must_use]
    pub fn allowance(&self) -> Option<OverrideGrant> {
        (self.default_minutes > 0 && self.default_uses > 0)
            .then(|| OverrideGrant::limited(self.default_minutes, self.default_uses))
    }
}

fn parse_count(value: Option<&Value>, field: &'static str) -> Result<u32, DefaultsError> {
    super::parse_count(value)
        .map_err(|_| DefaultsError::Invalid { field })?
        .ok_or(DefaultsError::Missing { field })
}

#[derive(Clone)]
pub struct DefaultsStore {
    kv: SharedKv,
    cached: Arc<RwLock<Option<GlobalDefaults>>>,
    builtin: GlobalDefaults,
}

impl DefaultsStore {
    #[must_use]
    pub fn new(kv: SharedKv, builtin: GlobalDefaults) -> Self {
        Self { kv, cached: Arc::new(RwLock::new(None)), builtin }
    }

    pub async fn get(&self) -> GlobalDefaults {
        match kv::get_json::<GlobalDefaults>(self.kv.as_ref(), DEFAULTS_KEY).await {
            Ok(Some(stored)) => return stored,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "global defaults read failed"),
        }
        let cached = *self
            .cached
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        cached.unwrap_or(self.builtin)
    }

    /// Replace the defaults for everyone.
    pub async fn set(&self, next: GlobalDefaults) -> GlobalDefaults {
        *self
            .cached
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(next);
        if let Err(e) = kv::set_json(self.kv.as_ref(), DEFAULTS_KEY, &next).await {
            warn!(error = %e, "global defaults write failed; keeping in-process value");
        }
        next
    }

    /// Restore the built-in values.
    pub async fn reset(&self) -> GlobalDefaults {
        self.set(self.builtin).await
    }
}

#[cfg(test)]
#[path = "defaults_test.rs"]
mod tests;
