//! In-memory rate limiting for generation requests.
//!
//! DESIGN
//! ======
//! Sliding-window counters backed by `HashMap<String, VecDeque<Instant>>`,
//! keyed by an arbitrary string (usually purpose + client IP). Two tiers are
//! applied to visitors without a live override:
//! - Burst: 10 requests / 5 min
//! - Sustained: 8 requests / min
//!
//! TRADE-OFFS
//! ==========
//! Buckets are process-local and never evicted. This is an abuse throttle,
//! not billing, so losing state on restart is fine and the per-key overhead
//! is a handful of `Instant`s.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::env_parse;
use crate::error::ErrorCode;

const DEFAULT_BURST_MAX: usize = 10;
const DEFAULT_BURST_WINDOW_SECS: u64 = 300;

const DEFAULT_SUSTAINED_MAX: usize = 8;
const DEFAULT_SUSTAINED_WINDOW_SECS: u64 = 60;

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub max: usize,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitTiers {
    pub burst: Tier,
    pub sustained: Tier,
}

impl RateLimitTiers {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_prefixed("RATE_LIMIT")
    }

    /// Read `{prefix}_BURST_MAX`, `{prefix}_BURST_WINDOW_SECS`,
    /// `{prefix}_SUSTAINED_MAX` and `{prefix}_SUSTAINED_WINDOW_SECS`, keeping
    /// the built-in value for anything unset or unparsable.
    #[must_use]
    pub fn from_env_prefixed(prefix: &str) -> Self {
        let var = |name: &str| format!("{prefix}_{name}");
        Self {
            burst: Tier {
                max: env_parse(&var("BURST_MAX"), DEFAULT_BURST_MAX),
                window: Duration::from_secs(env_parse(&var("BURST_WINDOW_SECS"), DEFAULT_BURST_WINDOW_SECS)),
            },
            sustained: Tier {
                max: env_parse(&var("SUSTAINED_MAX"), DEFAULT_SUSTAINED_MAX),
                window: Duration::from_secs(env_parse(&var("SUSTAINED_WINDOW_SECS"), DEFAULT_SUSTAINED_WINDOW_SECS)),
            },
        }
    }
}

impl Default for RateLimitTiers {
    fn default() -> Self {
        Self {
            burst: Tier { max: DEFAULT_BURST_MAX, window: Duration::from_secs(DEFAULT_BURST_WINDOW_SECS) },
            sustained: Tier {
                max: DEFAULT_SUSTAINED_MAX,
                window: Duration::from_secs(DEFAULT_SUSTAINED_WINDOW_SECS),
            },
        }
    }
}

// =============================================================================
// RESULT + ERROR TYPES
// =============================================================================

/// Outcome of a single [`RateLimiter::take`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Take {
    pub allowed: bool,
    pub remaining: usize,
    /// Time until the oldest retained request leaves the window.
    pub reset: Duration,
}

impl Take {
    #[must_use]
    pub fn reset_ms(&self) -> u64 {
        u64::try_from(self.reset.as_millis()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_ms().div_ceil(1000)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RateLimitDenied {
    #[error("You've hit the free limit ({limit} every {window_mins} minutes). Please try again later.")]
    Burst { limit: usize, window_mins: u64, retry_after_secs: u64 },
    #[error("Too many requests. Try again in {retry_after_secs}s.")]
    Sustained { retry_after_secs: u64 },
}

impl RateLimitDenied {
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            Self::Burst { retry_after_secs, .. } | Self::Sustained { retry_after_secs } => *retry_after_secs,
        }
    }
}

impl ErrorCode for RateLimitDenied {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Burst { .. } => "E_RATE_LIMIT_BURST",
            Self::Sustained { .. } => "E_RATE_LIMIT",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

// =============================================================================
// RATE LIMITER
// =============================================================================

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    tiers: RateLimitTiers,
}

impl RateLimiter {
    #[must_use]
    pub fn new(tiers: RateLimitTiers) -> Self {
        Self { buckets: Arc::new(Mutex::new(HashMap::new())), tiers }
    }

    /// Record a request against `key` if fewer than `max` landed in the
    /// trailing `window`.
    pub fn take(&self, key: &str, window: Duration, max: usize) -> Take {
        self.take_at(key, window, max, Instant::now())
    }

    /// Internal: take with explicit timestamp (for testing).
    fn take_at(&self, key: &str, window: Duration, max: usize, now: Instant) -> Take {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry(key.to_owned()).or_default();
        prune_window(bucket, now, window);

        if bucket.len() >= max {
            return Take { allowed: false, remaining: 0, reset: time_to_reset(bucket, now, window) };
        }

        bucket.push_back(now);
        Take { allowed: true, remaining: max - bucket.len(), reset: time_to_reset(bucket, now, window) }
    }

    /// Apply the burst tier, then the sustained tier, for a visitor.
    pub fn check_tiers(&self, ip: &str) -> Result<(), RateLimitDenied> {
        self.apply_tiers(ip, |key, tier| self.take(key, tier.window, tier.max))
    }

    #[cfg(test)]
    fn check_tiers_at(&self, ip: &str, now: Instant) -> Result<(), RateLimitDenied> {
        self.apply_tiers(ip, |key, tier| self.take_at(key, tier.window, tier.max, now))
    }

    fn apply_tiers(&self, ip: &str, mut take: impl FnMut(&str, Tier) -> Take) -> Result<(), RateLimitDenied> {
        let burst = self.tiers.burst;
        let outcome = take(&format!("burst:{ip}"), burst);
        if !outcome.allowed {
            return Err(RateLimitDenied::Burst {
                limit: burst.max,
                window_mins: burst.window.as_secs() / 60,
                retry_after_secs: outcome.retry_after_secs(),
            });
        }

        let sustained = self.tiers.sustained;
        let outcome = take(&format!("gen:{ip}"), sustained);
        if !outcome.allowed {
            return Err(RateLimitDenied::Sustained { retry_after_secs: outcome.retry_after_secs() });
        }
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitTiers::default())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Drop timestamps at or beyond the window edge. The deque is ordered, so
/// this is a prefix trim.
fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.saturating_duration_since(front) >= window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

fn time_to_reset(deque: &VecDeque<Instant>, now: Instant, window: Duration) -> Duration {
    deque
        .front()
        .map_or(window, |&oldest| window.saturating_sub(now.saturating_duration_since(oldest)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
