//! Override service: per-IP grants that bypass normal rate limiting.
//!
//! DESIGN
//! ======
//! One JSON record per IP under `override:<ip>`:
//! `{"remaining": int|null, "expiresAt": epoch_ms|null}`. `null` means
//! unlimited uses / no expiry. A record is alive while it has time left and
//! uses left; dead records are deleted lazily by whichever call finds them.
//!
//! TRADE-OFFS
//! ==========
//! `consume` decrements with compare-and-swap against the exact string it
//! read, retrying a few times on contention. Two concurrent consumes of the
//! last use therefore cannot both succeed. Lazy deletes use the same swap so
//! a cleanup never clobbers a grant that landed in between.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::now_ms;
use crate::error::ErrorCode;
use crate::kv::{self, KvError, SharedKv};

pub const OVERRIDE_PREFIX: &str = "override:";

const MS_PER_MINUTE: i64 = 60_000;
const CONSUME_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("ip is required")]
    MissingIp,
    #[error("minutes must be a positive integer")]
    InvalidMinutes,
    #[error("uses must be a positive integer")]
    InvalidUses,
    #[error("storage error: {0}")]
    Backend(#[from] KvError),
}

impl ErrorCode for OverrideError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingIp => "E_MISSING_IP",
            Self::InvalidMinutes => "E_INVALID_MINUTES",
            Self::InvalidUses => "E_INVALID_USES",
            Self::Backend(_) => "E_STORAGE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Backend(e) if e.retryable())
    }
}

/// Persisted override record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRecord {
    pub remaining: Option<u32>,
    pub expires_at: Option<i64>,
}

impl OverrideRecord {
    #[must_use]
    pub fn is_alive_at(&self, now_ms: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now_ms) && self.remaining.is_none_or(|n| n > 0)
    }
}

/// Budget for a new override. `None` means no limit on that axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct OverrideGrant {
    pub minutes: Option<u32>,
    pub uses: Option<u32>,
}

impl OverrideGrant {
    #[must_use]
    pub fn limited(minutes: u32, uses: u32) -> Self {
        Self { minutes: Some(minutes), uses: Some(uses) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideEntry {
    pub ip: String,
    pub remaining: Option<u32>,
    /// `None` for overrides without expiry.
    #[serde(rename = "millisecondsRemaining")]
    pub ms_remaining: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideStatus {
    pub unlocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_left: Option<i64>,
}

fn override_key(ip: &str) -> String {
    format!("{OVERRIDE_PREFIX}{ip}")
}

/// Raw string as read plus its decoded form (`None` if malformed).
struct Loaded {
    raw: String,
    record: Option<OverrideRecord>,
}

impl Loaded {
    fn alive_record(&self, now_ms: i64) -> Option<OverrideRecord> {
        self.record.filter(|r| r.is_alive_at(now_ms))
    }
}

#[derive(Clone)]
pub struct OverrideStore {
    kv: SharedKv,
}

impl OverrideStore {
    #[must_use]
    pub fn new(kv: SharedKv) -> Self {
        Self { kv }
    }

    /// Replace any override for `ip` with a fresh one.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty ip or a zero budget, or a
    /// backend error if the record could not be written.
    pub async fn grant(&self, ip: &str, grant: OverrideGrant) -> Result<OverrideRecord, OverrideError> {
        self.grant_at(ip, grant, now_ms()).await
    }

    pub(crate) async fn grant_at(
        &self,
        ip: &str,
        grant: OverrideGrant,
        now_ms: i64,
    ) -> Result<OverrideRecord, OverrideError> {
        let ip = ip.trim();
        if ip.is_empty() {
            return Err(OverrideError::MissingIp);
        }
        if grant.minutes == Some(0) {
            return Err(OverrideError::InvalidMinutes);
        }
        if grant.uses == Some(0) {
            return Err(OverrideError::InvalidUses);
        }

        let record = OverrideRecord {
            remaining: grant.uses,
            expires_at: grant
                .minutes
                .map(|m| now_ms.saturating_add(i64::from(m).saturating_mul(MS_PER_MINUTE))),
        };
        kv::set_json(self.kv.as_ref(), &override_key(ip), &record).await?;
        Ok(record)
    }

    /// Whether `ip` holds a live override. Dead records are removed.
    pub async fn is_alive(&self, ip: &str) -> bool {
        self.is_alive_at(ip, now_ms()).await
    }

    pub(crate) async fn is_alive_at(&self, ip: &str, now_ms: i64) -> bool {
        self.live_record_at(ip, now_ms).await.is_some()
    }

    /// Spend one use of the override for `ip`. Returns whether a use was
    /// consumed. Unlimited overrides are never decremented.
    pub async fn consume(&self, ip: &str) -> bool {
        self.consume_at(ip, now_ms()).await
    }

    pub(crate) async fn consume_at(&self, ip: &str, now_ms: i64) -> bool {
        let key = override_key(ip);
        for _ in 0..CONSUME_ATTEMPTS {
            let loaded = match self.load(&key).await {
                Ok(Some(loaded)) => loaded,
                Ok(None) => return false,
                Err(e) => {
                    warn!(%ip, error = %e, "override read failed during consume");
                    return false;
                }
            };
            let Some(record) = loaded.alive_record(now_ms) else {
                self.prune(&key, &loaded.raw).await;
                return false;
            };
            let Some(remaining) = record.remaining else {
                return true;
            };

            let left = remaining.saturating_sub(1);
            let next = if left == 0 {
                None
            } else {
                match kv::encode_json(&OverrideRecord { remaining: Some(left), ..record }) {
                    Ok(raw) => Some(raw),
                    Err(e) => {
                        warn!(%ip, error = %e, "override encode failed");
                        return false;
                    }
                }
            };

            match self
                .kv
                .compare_and_swap(&key, &loaded.raw, next.as_deref())
                .await
            {
                Ok(true) => return true,
                Ok(false) => debug!(%ip, "override changed during consume, retrying"),
                Err(e) => {
                    warn!(%ip, error = %e, "override write failed during consume");
                    return false;
                }
            }
        }
        warn!(%ip, attempts = CONSUME_ATTEMPTS, "override consume gave up under contention");
        false
    }

    /// Delete the override for `ip`, if any.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the delete could not be issued.
    pub async fn release(&self, ip: &str) -> Result<bool, OverrideError> {
        Ok(self.kv.delete(&override_key(ip)).await?)
    }

    /// Visitor-facing view of the override for `ip`.
    pub async fn status(&self, ip: &str) -> OverrideStatus {
        self.status_at(ip, now_ms()).await
    }

    pub(crate) async fn status_at(&self, ip: &str, now_ms: i64) -> OverrideStatus {
        match self.live_record_at(ip, now_ms).await {
            Some(record) => OverrideStatus {
                unlocked: true,
                remaining: record.remaining,
                seconds_left: record.expires_at.map(|at| (at - now_ms).max(0) / 1000),
            },
            None => OverrideStatus { unlocked: false, remaining: None, seconds_left: None },
        }
    }

    /// Every live override, soonest to expire first. Overrides without expiry
    /// sort last. Dead records found along the way are removed.
    pub async fn list_alive(&self) -> Vec<OverrideEntry> {
        self.list_alive_at(now_ms()).await
    }

    pub(crate) async fn list_alive_at(&self, now_ms: i64) -> Vec<OverrideEntry> {
        let keys = match self.kv.scan_prefix(OVERRIDE_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "override scan failed");
                return Vec::new();
            }
        };

        let loads = join_all(keys.iter().map(|key| self.load(key))).await;

        let mut entries = Vec::with_capacity(keys.len());
        for (key, loaded) in keys.iter().zip(loads) {
            let loaded = match loaded {
                Ok(Some(loaded)) => loaded,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%key, error = %e, "override read failed during list");
                    continue;
                }
            };
            let Some(record) = loaded.alive_record(now_ms) else {
                self.prune(key, &loaded.raw).await;
                continue;
            };
            entries.push(OverrideEntry {
                ip: key.strip_prefix(OVERRIDE_PREFIX).unwrap_or(key).to_owned(),
                remaining: record.remaining,
                ms_remaining: record.expires_at.map(|at| at - now_ms),
            });
        }

        entries.sort_by(|a, b| {
            (a.ms_remaining.is_none(), a.ms_remaining, &a.ip).cmp(&(b.ms_remaining.is_none(), b.ms_remaining, &b.ip))
        });
        entries
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    async fn live_record_at(&self, ip: &str, now_ms: i64) -> Option<OverrideRecord> {
        let key = override_key(ip);
        let loaded = match self.load(&key).await {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return None,
            Err(e) => {
                warn!(%ip, error = %e, "override read failed");
                return None;
            }
        };
        let record = loaded.alive_record(now_ms);
        if record.is_none() {
            self.prune(&key, &loaded.raw).await;
        }
        record
    }

    async fn load(&self, key: &str) -> Result<Option<Loaded>, KvError> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };
        let record = kv::decode_json::<OverrideRecord>(&raw).ok();
        Ok(Some(Loaded { raw, record }))
    }

    /// Delete a dead record, but only if nobody replaced it since we read it.
    async fn prune(&self, key: &str, raw: &str) {
        if let Err(e) = self.kv.compare_and_swap(key, raw, None).await {
            warn!(%key, error = %e, "override cleanup failed");
        }
    }
}

#[cfg(test)]
#[path = "overrides_test.rs"]
mod tests;
