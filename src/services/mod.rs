//! Domain services used by HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own quota semantics and storage layout so route handlers
//! can stay focused on request parsing and response shaping. Every service
//! holds a handle to the shared [`crate::kv::KvStore`] chosen at startup.

pub mod coupons;
pub mod defaults;
pub mod events;
pub mod gate;
pub mod metrics;
pub mod overrides;

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

/// Current time as milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// A count field that is present but not a non-negative whole number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InvalidCount;

/// Read a loosely-typed count from admin JSON. Integers, whole floats and
/// numeric strings are accepted; absent, `null` and blank strings read as
/// `None`.
pub(crate) fn parse_count(value: Option<&Value>) -> Result<Option<u32>, InvalidCount> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_u64() {
                return u32::try_from(i).map(Some).map_err(|_| InvalidCount);
            }
            n.as_f64().and_then(whole_count).map(Some).ok_or(InvalidCount)
        }
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<f64>().ok().and_then(whole_count).map(Some).ok_or(InvalidCount)
        }
        Some(_) => Err(InvalidCount),
    }
}

fn whole_count(f: f64) -> Option<u32> {
    if f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole = f as u32;
        Some(whole)
    } else {
        None
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
