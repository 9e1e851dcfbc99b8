//! Generation gate: decides whether a visitor may run one generation.
//!
//! A live override is spent instead of rate limiting. Visitors the store has
//! never seen receive the current global defaults as an override on their
//! first request; everyone else falls through to the two rate-limit tiers.
//! The first-seen marker expires, so a visitor who returns after
//! [`VISITOR_MARKER_TTL`] is treated as new again.

use std::time::Duration;

use tracing::{info, warn};

use super::defaults::DefaultsStore;
use super::overrides::OverrideStore;
use crate::kv::SharedKv;
use crate::rate_limit::{RateLimitDenied, RateLimiter};

pub const VISITOR_PREFIX: &str = "visitor:";
pub const VISITOR_MARKER_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// How an admitted request was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Override,
    RateLimited,
}

#[derive(Clone)]
pub struct Gate {
    kv: SharedKv,
    overrides: OverrideStore,
    defaults: DefaultsStore,
    limiter: RateLimiter,
}

impl Gate {
    #[must_use]
    pub fn new(kv: SharedKv, overrides: OverrideStore, defaults: DefaultsStore, limiter: RateLimiter) -> Self {
        Self { kv, overrides, defaults, limiter }
    }

    /// Admit or deny one generation for `ip`.
    ///
    /// # Errors
    ///
    /// Returns the tier that denied the request when no override applies and
    /// the visitor is over a rate limit.
    pub async fn admit(&self, ip: &str) -> Result<Admission, RateLimitDenied> {
        let mut alive = self.overrides.is_alive(ip).await;
        if !alive && self.mark_first_seen(ip).await {
            alive = self.grant_defaults(ip).await;
        }

        if alive && self.overrides.consume(ip).await {
            info!(%ip, "override bypass");
            return Ok(Admission::Override);
        }

        self.limiter.check_tiers(ip)?;
        Ok(Admission::RateLimited)
    }

    /// Returns true only on the request that creates the ip's marker, so at
    /// most once per marker lifetime. A store failure counts as "seen" so no
    /// allowance is granted.
    async fn mark_first_seen(&self, ip: &str) -> bool {
        let marker = format!("{VISITOR_PREFIX}{ip}");
        self.kv
            .set_if_absent(&marker, "1", VISITOR_MARKER_TTL)
            .await
            .unwrap_or_else(|e| {
                warn!(%ip, error = %e, "visitor marker write failed");
                false
            })
    }

    async fn grant_defaults(&self, ip: &str) -> bool {
        let Some(grant) = self.defaults.get().await.allowance() else {
            return false;
        };
        if let Err(e) = self.overrides.grant(ip, grant).await {
            warn!(%ip, error = %e, "default allowance grant failed");
            return false;
        }
        info!(%ip, minutes = ?grant.minutes, uses = ?grant.uses, "granted default allowance");
        self.overrides.is_alive(ip).await
    }
}

#[cfg(test)]
#[path = "gate_test.rs"]
mod tests;
