//! Coupon service: named templates that grant overrides on redemption.
//!
//! DESIGN
//! ======
//! Each template is a JSON string record under `coupon:<code>` holding
//! `{"minutes": int, "uses": int}`. Codes are case-insensitive and always
//! lower-cased before a key is derived.
//!
//! `coupon:index` is a set of known codes kept only to speed up listing. It
//! is a cache, not a source of truth: writes to it are best-effort, listing
//! falls back to a prefix scan whenever the index yields no valid template, and
//! `repair` reconciles it with the records.
//!
//! ERROR HANDLING
//! ==============
//! Earlier deployments wrote templates with the wrong Redis type. Reads treat
//! such keys as missing, `upsert` deletes before writing so `SET` can never
//! collide with them, and `repair` removes them outright.

use std::collections::BTreeMap;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SeedCoupon;
use crate::error::ErrorCode;
use crate::kv::{self, BackendKind, KeyType, KvError, SharedKv};

pub const COUPON_PREFIX: &str = "coupon:";
pub const COUPON_INDEX: &str = "coupon:index";

#[derive(Debug, thiserror::Error)]
pub enum CouponError {
    #[error("code is required")]
    MissingCode,
    #[error("minutes must be a positive integer")]
    InvalidMinutes,
    #[error("uses must be a positive integer")]
    InvalidUses,
    #[error("storage error: {0}")]
    Backend(#[from] KvError),
}

impl ErrorCode for CouponError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCode => "E_MISSING_CODE",
            Self::InvalidMinutes => "E_INVALID_MINUTES",
            Self::InvalidUses => "E_INVALID_USES",
            Self::Backend(_) => "E_STORAGE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Backend(e) if e.retryable())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponTemplate {
    pub minutes: u32,
    pub uses: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CouponEntry {
    pub code: String,
    pub minutes: u32,
    pub uses: u32,
}

/// Operator view of everything under the coupon prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponDump {
    pub backend: BackendKind,
    pub index_codes: Vec<String>,
    pub keys: Vec<String>,
    pub types_by_key: BTreeMap<String, String>,
    pub items_by_key: BTreeMap<String, Option<CouponTemplate>>,
    pub items_by_code: BTreeMap<String, Option<CouponTemplate>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub deleted_wrong_type: usize,
    pub index_pruned: usize,
    pub checked_keys: usize,
    pub checked_codes: usize,
}

/// Trim and lower-case a user-supplied code.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase()
}

fn coupon_key(code: &str) -> String {
    format!("{COUPON_PREFIX}{code}")
}

/// Decode a stored template. Anything that is not a JSON object with
/// positive integer `minutes` and `uses` is rejected.
pub(crate) fn decode_template(raw: &str) -> Option<CouponTemplate> {
    let template: CouponTemplate = kv::decode_json(raw).ok()?;
    (template.minutes > 0 && template.uses > 0).then_some(template)
}

#[derive(Clone)]
pub struct CouponStore {
    kv: SharedKv,
}

impl CouponStore {
    #[must_use]
    pub fn new(kv: SharedKv) -> Self {
        Self { kv }
    }

    /// Create or replace a template.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank code or zero budget, or a
    /// backend error if the template record could not be written. Index
    /// failures are logged only.
    pub async fn upsert(&self, code: &str, minutes: u32, uses: u32) -> Result<CouponEntry, CouponError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(CouponError::MissingCode);
        }
        if minutes == 0 {
            return Err(CouponError::InvalidMinutes);
        }
        if uses == 0 {
            return Err(CouponError::InvalidUses);
        }

        let key = coupon_key(&code);
        // Clear wrong-type leftovers so the write below cannot collide with them.
        if let Err(e) = self.kv.delete(&key).await {
            warn!(%code, error = %e, "coupon pre-delete failed");
        }
        kv::set_json(self.kv.as_ref(), &key, &CouponTemplate { minutes, uses }).await?;
        if let Err(e) = self.kv.add_member(COUPON_INDEX, &code).await {
            warn!(%code, error = %e, "coupon index add failed");
        }
        Ok(CouponEntry { code, minutes, uses })
    }

    /// Template for `code`, if one exists and is well-formed.
    pub async fn lookup(&self, code: &str) -> Option<CouponTemplate> {
        let code = normalize_code(code);
        if code.is_empty() {
            return None;
        }
        match self.kv.get(&coupon_key(&code)).await {
            Ok(raw) => raw.as_deref().and_then(decode_template),
            Err(e) => {
                warn!(%code, error = %e, "coupon lookup failed");
                None
            }
        }
    }

    /// Remove a template. Returns whether a record was deleted.
    pub async fn delete(&self, code: &str) -> bool {
        let code = normalize_code(code);
        if code.is_empty() {
            return false;
        }
        let deleted = match self.kv.delete(&coupon_key(&code)).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(%code, error = %e, "coupon delete failed");
                false
            }
        };
        if let Err(e) = self.kv.remove_member(COUPON_INDEX, &code).await {
            warn!(%code, error = %e, "coupon index remove failed");
        }
        deleted
    }

    /// Every well-formed template, sorted by code. The index is tried first;
    /// when it yields nothing usable the keyspace is scanned instead.
    pub async fn list_all(&self) -> Vec<CouponEntry> {
        let indexed = match self.kv.members_of(COUPON_INDEX).await {
            Ok(codes) => self.load_entries(codes).await,
            Err(e) => {
                warn!(error = %e, "coupon index unreadable, falling back to scan");
                Vec::new()
            }
        };
        let mut out = if indexed.is_empty() {
            self.load_entries(self.scan_codes().await).await
        } else {
            indexed
        };
        out.sort_by(|a, b| a.code.cmp(&b.code));
        out
    }

    /// Decode the template behind each code, dropping missing or malformed
    /// records.
    async fn load_entries(&self, codes: Vec<String>) -> Vec<CouponEntry> {
        if codes.is_empty() {
            return Vec::new();
        }
        let keys: Vec<String> = codes.iter().map(|code| coupon_key(code)).collect();
        let values = join_all(keys.iter().map(|key| self.kv.get(key))).await;

        codes
            .into_iter()
            .zip(values)
            .filter_map(|(code, value)| {
                let template = value.ok().flatten().as_deref().and_then(decode_template)?;
                Some(CouponEntry { code, minutes: template.minutes, uses: template.uses })
            })
            .collect()
    }

    /// Inspect the raw coupon keyspace. Never fails; each individual lookup
    /// that errors shows up as `null` / `"unknown"`.
    pub async fn diagnostic_dump(&self) -> CouponDump {
        let index_codes = self.kv.members_of(COUPON_INDEX).await.unwrap_or_else(|e| {
            warn!(error = %e, "coupon index unreadable");
            Vec::new()
        });
        let mut keys = self.kv.scan_prefix(COUPON_PREFIX).await.unwrap_or_else(|e| {
            warn!(error = %e, "coupon scan failed");
            Vec::new()
        });
        keys.sort();

        let mut types_by_key = BTreeMap::new();
        let mut items_by_key = BTreeMap::new();
        for key in keys.iter().filter(|k| k.as_str() != COUPON_INDEX) {
            let key_type = self
                .kv
                .type_of(key)
                .await
                .map_or_else(|_| "unknown".to_owned(), |t| t.to_string());
            types_by_key.insert(key.clone(), key_type);
            items_by_key.insert(key.clone(), self.read_template(key).await);
        }

        let mut items_by_code = BTreeMap::new();
        for code in &index_codes {
            items_by_code.insert(code.clone(), self.read_template(&coupon_key(code)).await);
        }

        CouponDump { backend: self.kv.kind(), index_codes, keys, types_by_key, items_by_key, items_by_code }
    }

    /// Delete template keys that are not plain string records, then drop
    /// index entries that no longer point at a valid template. Safe to run
    /// repeatedly; a consistent store reports zero changes.
    pub async fn repair(&self) -> RepairReport {
        let mut report = RepairReport::default();

        match self.kv.scan_prefix(COUPON_PREFIX).await {
            Ok(keys) => {
                for key in keys.iter().filter(|k| k.as_str() != COUPON_INDEX) {
                    report.checked_keys += 1;
                    let key_type = self.kv.type_of(key).await.unwrap_or(KeyType::Other("unknown".into()));
                    if key_type == KeyType::String || key_type == KeyType::None {
                        continue;
                    }
                    match self.kv.delete(key).await {
                        Ok(_) => {
                            report.deleted_wrong_type += 1;
                            info!(%key, %key_type, "deleted wrong-type coupon key");
                        }
                        Err(e) => warn!(%key, error = %e, "wrong-type coupon delete failed"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "coupon scan failed during repair"),
        }

        match self.kv.members_of(COUPON_INDEX).await {
            Ok(codes) => {
                for code in codes {
                    report.checked_codes += 1;
                    if self.read_template(&coupon_key(&code)).await.is_some() {
                        continue;
                    }
                    match self.kv.remove_member(COUPON_INDEX, &code).await {
                        Ok(()) => {
                            report.index_pruned += 1;
                            info!(%code, "pruned stale coupon index entry");
                        }
                        Err(e) => warn!(%code, error = %e, "coupon index prune failed"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "coupon index unreadable during repair"),
        }

        report
    }

    /// Seed the template configured through `COUPON_*` at startup.
    pub async fn seed(&self, seed: &SeedCoupon) {
        match self.upsert(&seed.code, seed.minutes, seed.uses).await {
            Ok(entry) => info!(code = %entry.code, minutes = entry.minutes, uses = entry.uses, "seeded coupon"),
            Err(e) => warn!(error = %e, "coupon seed failed"),
        }
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    async fn scan_codes(&self) -> Vec<String> {
        match self.kv.scan_prefix(COUPON_PREFIX).await {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| k != COUPON_INDEX)
                .filter_map(|k| k.strip_prefix(COUPON_PREFIX).map(str::to_owned))
                .collect(),
            Err(e) => {
                warn!(error = %e, "coupon scan failed");
                Vec::new()
            }
        }
    }

    async fn read_template(&self, key: &str) -> Option<CouponTemplate> {
        self.kv.get(key).await.ok().flatten().as_deref().and_then(decode_template)
    }
}

#[cfg(test)]
#[path = "coupons_test.rs"]
mod tests;
