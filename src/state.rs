//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! Every store is built once from the KV backend selected at startup, so
//! handlers never touch backend details. Clone is cheap: each field is an
//! `Arc` or a handle around one. The client event tracker is the one
//! piece of state that never touches the KV backend.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::generate::MonologueWriter;
use crate::kv::SharedKv;
use crate::rate_limit::{RateLimitTiers, RateLimiter};
use crate::services::coupons::CouponStore;
use crate::services::defaults::{DefaultsStore, GlobalDefaults};
use crate::services::events::EventTracker;
use crate::services::gate::Gate;
use crate::services::metrics::MetricsStore;
use crate::services::overrides::OverrideStore;

#[derive(Clone)]
pub struct AppState {
    pub kv: SharedKv,
    pub overrides: OverrideStore,
    pub coupons: CouponStore,
    pub defaults: DefaultsStore,
    pub metrics: MetricsStore,
    /// Process-local client events; not persisted.
    pub events: EventTracker,
    pub gate: Gate,
    /// `None` if no generation backend is configured.
    pub writer: Option<Arc<dyn MonologueWriter>>,
    /// Shared secret for `/api/admin/*`. `None` disables the admin surface.
    pub admin_key: Option<Arc<str>>,
}

impl AppState {
    #[must_use]
    pub fn new(
        kv: SharedKv,
        config: &AppConfig,
        tiers: RateLimitTiers,
        writer: Option<Arc<dyn MonologueWriter>>,
    ) -> Self {
        let overrides = OverrideStore::new(kv.clone());
        let defaults = DefaultsStore::new(kv.clone(), GlobalDefaults::builtin(config));
        let gate = Gate::new(kv.clone(), overrides.clone(), defaults.clone(), RateLimiter::new(tiers));
        Self {
            coupons: CouponStore::new(kv.clone()),
            metrics: MetricsStore::new(kv.clone()),
            events: EventTracker::new(),
            overrides,
            defaults,
            gate,
            writer,
            admin_key: config.admin_key.as_deref().map(Arc::from),
            kv,
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::kv::MemoryStore;

    pub const TEST_ADMIN_KEY: &str = "test-admin-key";

    /// Memory-backed state with an admin key, default tiers, and no writer.
    #[must_use]
    pub fn test_app_state() -> AppState {
        test_app_state_with_writer(None)
    }

    #[must_use]
    pub fn test_app_state_with_writer(writer: Option<Arc<dyn MonologueWriter>>) -> AppState {
        let config = AppConfig { admin_key: Some(TEST_ADMIN_KEY.to_owned()), ..AppConfig::default() };
        AppState::new(Arc::new(MemoryStore::new()), &config, RateLimitTiers::default(), writer)
    }
}
