//! Client event route: the UI reports page views and clicks here.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::parse_body;
use crate::client_ip::resolve_client_ip;
use crate::services::events::EventSnapshot;
use crate::state::AppState;

const UNKNOWN_EVENT: &str = "unknown";

/// `POST /api/metrics`: `{event, data}`. A missing event is recorded as
/// `"unknown"` and missing data as `{}`.
pub async fn record(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let body: Value = parse_body(&body);
    let event = body.get("event").and_then(Value::as_str).unwrap_or(UNKNOWN_EVENT);
    let data = body.get("data").cloned().unwrap_or_else(|| json!({}));
    let ua = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let ip = resolve_client_ip(&headers);

    let recorded = state.events.record(event, &ip, data);
    info!(
        ts = %recorded.ts,
        event = %recorded.event,
        %ip,
        %ua,
        data = %recorded.data,
        "client event"
    );
    Json(json!({ "ok": true }))
}

#[derive(Deserialize)]
pub struct StatsQuery {
    stats: Option<String>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    ok: bool,
    #[serde(flatten)]
    snapshot: EventSnapshot,
}

/// `GET /api/metrics`: liveness reply, or the event snapshot with `?stats=1`.
pub async fn stats(State(state): State<AppState>, Query(query): Query<StatsQuery>) -> Response {
    if query.stats.as_deref() != Some("1") {
        return Json(json!({ "ok": true, "route": "metrics" })).into_response();
    }
    Json(StatsResponse { ok: true, snapshot: state.events.snapshot() }).into_response()
}
