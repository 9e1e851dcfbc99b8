//! Monologue generation routes, gated by overrides and rate limits.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::{ApiError, parse_body};
use crate::client_ip::resolve_client_ip;
use crate::error::ErrorCode;
use crate::generate::{GenerateError, MonologueWriter};
use crate::services::metrics::GenerationMeta;
use crate::state::AppState;

#[derive(Serialize)]
pub struct MonologueResponse {
    ok: bool,
    title: String,
    text: String,
}

/// `GET /api/monologue`: liveness check for the route.
pub async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "route": "monologue", "method": "GET" }))
}

/// Resolve the writer and the caller, then spend one admission for them.
/// Nothing is spent when no writer is configured.
async fn admit(state: &AppState, headers: &HeaderMap) -> Result<(Arc<dyn MonologueWriter>, String), ApiError> {
    let Some(writer) = state.writer.clone() else {
        return Err(ApiError::from_error(StatusCode::SERVICE_UNAVAILABLE, &GenerateError::NotConfigured));
    };
    let ip = resolve_client_ip(headers);

    if let Err(denied) = state.gate.admit(&ip).await {
        info!(%ip, code = denied.error_code(), "generation denied");
        return Err(
            ApiError::from_error(StatusCode::TOO_MANY_REQUESTS, &denied).with_retry_after(denied.retry_after_secs())
        );
    }
    Ok((writer, ip))
}

fn log_generation(ip: &str, meta: &GenerationMeta, streaming: bool) {
    info!(
        %ip,
        age = %meta.age,
        genre = %meta.genre,
        length = %meta.length,
        level = %meta.level,
        period = %meta.period,
        streaming,
        "generation"
    );
}

fn upstream_error(ip: &str, e: &GenerateError) -> ApiError {
    error!(%ip, error = %e, retryable = e.retryable(), "generation failed");
    ApiError::from_error(StatusCode::BAD_GATEWAY, e)
}

/// `POST /api/monologue`: admit the caller, generate, and count the request.
///
/// A missing or malformed body falls back to the default selections.
pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MonologueResponse>, ApiError> {
    let (writer, ip) = admit(&state, &headers).await?;
    let meta: GenerationMeta = parse_body(&body);
    log_generation(&ip, &meta, false);

    let monologue = writer.write(&meta).await.map_err(|e| upstream_error(&ip, &e))?;
    state.metrics.record(&meta).await;

    Ok(Json(MonologueResponse { ok: true, title: monologue.title, text: monologue.text }))
}

/// `GET /api/monologue/stream?age=..&genre=..`: same gate as `POST`, but the
/// text is streamed as `text/plain` while the model writes it. A failure
/// after the first byte is appended to the body as `[stream error: ...]`.
pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(meta): Query<GenerationMeta>,
) -> Result<Response, ApiError> {
    let (writer, ip) = admit(&state, &headers).await?;
    let meta = meta.with_blank_defaults();
    log_generation(&ip, &meta, true);

    let fragments = writer.stream(&meta).await.map_err(|e| upstream_error(&ip, &e))?;
    state.metrics.record(&meta).await;

    let body = fragments.map(move |fragment| {
        Ok::<_, Infallible>(match fragment {
            Ok(text) => text,
            Err(e) => {
                warn!(%ip, error = %e, "generation stream failed");
                format!("\n[stream error: {e}]")
            }
        })
    });
    Ok((
        [(CONTENT_TYPE, "text/plain; charset=utf-8"), (CACHE_CONTROL, "no-store")],
        Body::from_stream(body),
    )
        .into_response())
}
