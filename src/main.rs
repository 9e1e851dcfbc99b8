mod client_ip;
mod config;
mod error;
mod generate;
mod kv;
mod rate_limit;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use config::AppConfig;
use generate::{MonologueWriter, OpenAiWriter};
use rate_limit::RateLimitTiers;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env();
    let tiers = RateLimitTiers::from_env();
    tracing::info!(
        burst_max = tiers.burst.max,
        burst_window_secs = tiers.burst.window.as_secs(),
        sustained_max = tiers.sustained.max,
        sustained_window_secs = tiers.sustained.window.as_secs(),
        "rate limit tiers"
    );

    let kv = kv::from_config(&config).expect("kv backend init failed");
    tracing::info!(backend = ?kv.kind(), "kv backend selected");
    if !config.kv_configured() {
        tracing::warn!("UPSTASH_REDIS_REST_URL/TOKEN not set; quota state is process-local");
    }

    // Generation is optional: the gate and admin surface work without it.
    let writer: Option<Arc<dyn MonologueWriter>> = match OpenAiWriter::from_config(&config) {
        Ok(Some(writer)) => {
            tracing::info!(model = %config.openai_model, "generation backend initialized");
            Some(Arc::new(writer))
        }
        Ok(None) => {
            tracing::warn!("OPENAI_API_KEY not set; generation disabled");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "generation backend init failed; generation disabled");
            None
        }
    };

    let state = state::AppState::new(kv, &config, tiers, writer);
    if let Some(seed) = &config.seed_coupon {
        state.coupons.seed(seed).await;
    }
    if state.admin_key.is_none() {
        tracing::warn!("ADMIN_KEY not set; admin routes will reject every request");
    }

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "visitor-gate listening");
    axum::serve(listener, app).await.expect("server failed");
}
