//! Service configuration parsed from environment variables.

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_KV_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Coupon template seeded at startup from `COUPON_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedCoupon {
    pub code: String,
    pub minutes: u32,
    pub uses: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    pub upstash_url: Option<String>,
    pub upstash_token: Option<String>,
    pub kv_request_timeout_secs: u64,
    pub admin_key: Option<String>,
    pub default_minutes: Option<u32>,
    pub default_uses: Option<u32>,
    pub seed_coupon: Option<SeedCoupon>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
}

impl AppConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `UPSTASH_REDIS_REST_URL` + `UPSTASH_REDIS_REST_TOKEN`: durable store
    /// - `KV_REQUEST_TIMEOUT_SECS`: default 10
    /// - `ADMIN_KEY`: shared secret for `/api/admin/*`
    /// - `DEFAULT_MINUTES`, `DEFAULT_USES`: built-in visitor allowance
    /// - `COUPON_CODE`, `COUPON_MINUTES`, `COUPON_USES`: seeded coupon
    /// - `OPENAI_API_KEY`, `OPENAI_MODEL`, `OPENAI_BASE_URL`: generation backend
    ///
    /// Rate limit tiers are read separately by `RateLimitTiers::from_env`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            upstash_url: env_nonempty("UPSTASH_REDIS_REST_URL"),
            upstash_token: env_nonempty("UPSTASH_REDIS_REST_TOKEN"),
            kv_request_timeout_secs: env_parse("KV_REQUEST_TIMEOUT_SECS", DEFAULT_KV_REQUEST_TIMEOUT_SECS),
            admin_key: env_nonempty("ADMIN_KEY"),
            default_minutes: env_opt("DEFAULT_MINUTES"),
            default_uses: env_opt("DEFAULT_USES"),
            seed_coupon: seed_coupon(
                env_nonempty("COUPON_CODE"),
                env_parse("COUPON_MINUTES", 0),
                env_parse("COUPON_USES", 0),
            ),
            openai_api_key: env_nonempty("OPENAI_API_KEY"),
            openai_model: env_nonempty("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_owned()),
            openai_base_url: env_nonempty("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
        }
    }

    #[must_use]
    pub fn kv_configured(&self) -> bool {
        self.upstash_url.is_some() && self.upstash_token.is_some()
    }
}

fn seed_coupon(code: Option<String>, minutes: u32, uses: u32) -> Option<SeedCoupon> {
    let code = code?;
    if minutes == 0 || uses == 0 {
        return None;
    }
    Some(SeedCoupon { code, minutes, uses })
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key).unwrap_or(default)
}

pub(crate) fn env_opt<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
}

pub(crate) fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
