//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Public endpoints (coupon redemption, monologue generation, client events)
//! and the admin surface under `/api/admin` share one Axum router. Errors
//! leave handlers as [`ApiError`], which renders `{ok: false, code, error}`
//! with the status chosen by the handler.

pub mod admin;
pub mod coupon;
pub mod events;
pub mod monologue;

use axum::Router;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ErrorCode;
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/ping", get(ping))
        .route("/api/coupon", get(coupon::status).post(coupon::redeem))
        .route("/api/monologue", get(monologue::liveness).post(monologue::generate))
        .route("/api/monologue/stream", get(monologue::stream))
        .route("/api/metrics", get(events::stats).post(events::record))
        .nest("/api/admin", admin::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "pong": true }))
}

/// Decode a JSON body leniently: anything unreadable becomes `T::default()`
/// so handlers report missing fields instead of a transport error.
pub(crate) fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap_or_default()
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// JSON error body with a stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into(), retry_after_secs: None }
    }

    pub fn from_error(status: StatusCode, err: &impl ErrorCode) -> Self {
        Self::new(status, err.error_code(), err.to_string())
    }

    #[must_use]
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "ok": false, "code": self.code, "error": self.message }));
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
