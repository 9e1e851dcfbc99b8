use super::*;
use serde_json::json;
use std::sync::Arc;

use crate::kv::test_helpers::failing;
use crate::kv::{KvStore, MemoryStore};

const BUILTIN: GlobalDefaults = GlobalDefaults { default_minutes: 60, default_uses: 5 };

fn store() -> (DefaultsStore, Arc<MemoryStore>) {
    let kv = Arc::new(MemoryStore::new());
    (DefaultsStore::new(kv.clone(), BUILTIN), kv)
}

// =============================================================================
// get / set
// =============================================================================

#[tokio::test]
async fn untouched_store_returns_builtin() {
    let (defaults, _) = store();
    assert_eq!(defaults.get().await, BUILTIN);
}

#[tokio::test]
async fn set_then_get_returns_new_pair() {
    let (defaults, kv) = store();
    let next = GlobalDefaults { default_minutes: 120, default_uses: 5 };
    defaults.set(next).await;
    assert_eq!(defaults.get().await, next);

    let raw = kv.get(DEFAULTS_KEY).await.unwrap().unwrap();
    assert_eq!(raw, r#"{"defaultMinutes":120,"defaultUses":5}"#);
}

#[tokio::test]
async fn persisted_record_wins_over_cache() {
    let (defaults, kv) = store();
    defaults
        .set(GlobalDefaults { default_minutes: 1, default_uses: 1 })
        .await;
    // Another instance wrote through the shared store.
    kv.set(DEFAULTS_KEY, r#"{"defaultMinutes":30,"defaultUses":9}"#)
        .await
        .unwrap();
    assert_eq!(defaults.get().await, GlobalDefaults { default_minutes: 30, default_uses: 9 });
}

#[tokio::test]
async fn malformed_record_falls_back_to_cache_then_builtin() {
    let (defaults, kv) = store();
    kv.set(DEFAULTS_KEY, "garbage").await.unwrap();
    assert_eq!(defaults.get().await, BUILTIN);
}

#[tokio::test]
async fn set_survives_backend_failure() {
    let defaults = DefaultsStore::new(failing(), BUILTIN);
    assert_eq!(defaults.get().await, BUILTIN);
    let next = GlobalDefaults { default_minutes: 15, default_uses: 2 };
    assert_eq!(defaults.set(next).await, next);
    assert_eq!(defaults.get().await, next);
}

#[tokio::test]
async fn reset_restores_builtin() {
    let (defaults, _) = store();
    defaults
        .set(GlobalDefaults { default_minutes: 1, default_uses: 1 })
        .await;
    assert_eq!(defaults.reset().await, BUILTIN);
    assert_eq!(defaults.get().await, BUILTIN);
}

// =============================================================================
// input parsing
// =============================================================================

#[test]
fn from_input_accepts_numbers_and_numeric_strings() {
    let parsed = GlobalDefaults::from_input(Some(&json!(120)), Some(&json!("5"))).unwrap();
    assert_eq!(parsed, GlobalDefaults { default_minutes: 120, default_uses: 5 });
    let parsed = GlobalDefaults::from_input(Some(&json!(30.0)), Some(&json!(0))).unwrap();
    assert_eq!(parsed, GlobalDefaults { default_minutes: 30, default_uses: 0 });
}

#[test]
fn from_input_rejects_invalid_values() {
    assert_eq!(
        GlobalDefaults::from_input(Some(&json!(-1)), Some(&json!(5))),
        Err(DefaultsError::Invalid { field: "defaultMinutes" })
    );
    assert_eq!(
        GlobalDefaults::from_input(Some(&json!(10)), Some(&json!(2.5))),
        Err(DefaultsError::Invalid { field: "defaultUses" })
    );
    assert_eq!(
        GlobalDefaults::from_input(Some(&json!("ten")), Some(&json!(5))),
        Err(DefaultsError::Invalid { field: "defaultMinutes" })
    );
    assert_eq!(
        GlobalDefaults::from_input(Some(&json!(true)), Some(&json!(5))),
        Err(DefaultsError::Invalid { field: "defaultMinutes" })
    );
}

#[test]
fn from_input_reports_missing_fields() {
    assert_eq!(
        GlobalDefaults::from_input(None, Some(&json!(5))),
        Err(DefaultsError::Missing { field: "defaultMinutes" })
    );
    assert_eq!(
        GlobalDefaults::from_input(Some(&json!(5)), Some(&Value::Null)),
        Err(DefaultsError::Missing { field: "defaultUses" })
    );
}

#[test]
fn allowance_requires_both_positive() {
    assert_eq!(BUILTIN.allowance(), Some(OverrideGrant::limited(60, 5)));
    assert_eq!(GlobalDefaults { default_minutes: 0, default_uses: 5 }.allowance(), None);
    assert_eq!(GlobalDefaults { default_minutes: 5, default_uses: 0 }.allowance(), None);
}

#[test]
fn builtin_reads_config_overrides() {
    let config = AppConfig { default_minutes: Some(10), ..AppConfig::default() };
    assert_eq!(GlobalDefaults::builtin(&config), GlobalDefaults { default_minutes: 10, default_uses: 5 });
}
