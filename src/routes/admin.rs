//! Admin routes: coupon templates, overrides, global defaults, metrics.
//!
//! Every handler takes [`AdminKey`], which requires the `x-admin-key` header
//! to match the configured `ADMIN_KEY`. With no key configured the whole
//! surface answers 401. Responses are marked `Cache-Control: no-store`.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{FromRef, FromRequestParts, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use super::{ApiError, parse_body};
use crate::error::ErrorCode;
use crate::services::coupons::{CouponError, RepairReport};
use crate::services::defaults::GlobalDefaults;
use crate::services::overrides::{OverrideEntry, OverrideError, OverrideGrant};
use crate::services::parse_count;
use crate::state::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

const DEFAULT_STATS_DAYS: u32 = 30;
const DEFAULT_EXPORT_DAYS: u32 = 60;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/coupons", get(list_coupons).post(upsert_coupon).delete(delete_coupon))
        .route("/coupons/debug", get(debug_coupons))
        .route("/coupons/repair", post(repair_coupons))
        .route("/overrides", get(list_overrides).post(grant_override).delete(release_override))
        .route("/settings", get(get_settings).post(save_settings).delete(reset_settings))
        .route("/stats", get(global_stats))
        .route("/stats/daily", get(daily_stats))
        .route("/export/coupons", get(export_coupons))
        .route("/export/stats", get(export_stats))
        .route("/diag", get(diag))
        .layer(SetResponseHeaderLayer::overriding(CACHE_CONTROL, HeaderValue::from_static("no-store")))
}

// =============================================================================
// ADMIN EXTRACTOR
// =============================================================================

/// Proof that the request carried the admin key.
pub struct AdminKey;

impl<S> FromRequestParts<S> for AdminKey
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let Some(expected) = app_state.admin_key.as_deref() else {
            return Err(unauthorized("ADMIN_KEY is not configured on the server"));
        };
        let provided = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if provided.is_empty() {
            return Err(unauthorized("x-admin-key header missing"));
        }
        if provided != expected {
            return Err(unauthorized("Unauthorized"));
        }
        Ok(Self)
    }
}

fn unauthorized(message: &str) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "E_UNAUTHORIZED", message)
}

fn coupon_error(err: &CouponError) -> ApiError {
    let status = match err {
        CouponError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    };
    ApiError::from_error(status, err)
}

fn override_error(err: &OverrideError) -> ApiError {
    let status = match err {
        OverrideError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    };
    ApiError::from_error(status, err)
}

/// Read a count field from a JSON body, mapping a malformed value to `invalid`.
fn count_field<E: ErrorCode>(body: &Value, field: &str, invalid: E) -> Result<Option<u32>, ApiError> {
    parse_count(body.get(field)).map_err(|_| ApiError::from_error(StatusCode::BAD_REQUEST, &invalid))
}

fn string_field<'a>(body: &'a Value, field: &str) -> &'a str {
    body.get(field).and_then(Value::as_str).unwrap_or_default()
}

// =============================================================================
// COUPONS
// =============================================================================

#[derive(Deserialize)]
pub struct CodeQuery {
    code: Option<String>,
}

/// `GET /api/admin/coupons`
pub async fn list_coupons(_admin: AdminKey, State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "coupons": state.coupons.list_all().await }))
}

/// `POST /api/admin/coupons`: create or replace a template. `minutes` and
/// `uses` may be numbers or numeric strings.
pub async fn upsert_coupon(_admin: AdminKey, State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let body: Value = parse_body(&body);
    let code = string_field(&body, "code");
    if code.trim().is_empty() {
        return Err(coupon_error(&CouponError::MissingCode));
    }
    let minutes = count_field(&body, "minutes", CouponError::InvalidMinutes)?;
    let uses = count_field(&body, "uses", CouponError::InvalidUses)?;
    let entry = state
        .coupons
        .upsert(code, minutes.unwrap_or(0), uses.unwrap_or(0))
        .await
        .map_err(|e| coupon_error(&e))?;
    info!(code = %entry.code, minutes = entry.minutes, uses = entry.uses, "coupon saved");
    Ok(Json(json!({ "ok": true, "coupon": entry })))
}

/// `DELETE /api/admin/coupons?code=...`
pub async fn delete_coupon(
    _admin: AdminKey,
    State(state): State<AppState>,
    Query(query): Query<CodeQuery>,
) -> Result<Json<Value>, ApiError> {
    let Some(code) = query.code.filter(|c| !c.trim().is_empty()) else {
        return Err(coupon_error(&CouponError::MissingCode));
    };
    let deleted = state.coupons.delete(&code).await;
    Ok(Json(json!({ "ok": true, "deleted": deleted })))
}

/// `GET /api/admin/coupons/debug`: raw view of every coupon key.
pub async fn debug_coupons(_admin: AdminKey, State(state): State<AppState>) -> Response {
    Json(state.coupons.diagnostic_dump().await).into_response()
}

#[derive(Serialize)]
pub struct RepairResponse {
    ok: bool,
    #[serde(flatten)]
    report: RepairReport,
}

/// `POST /api/admin/coupons/repair`
pub async fn repair_coupons(_admin: AdminKey, State(state): State<AppState>) -> Json<RepairResponse> {
    let report = state.coupons.repair().await;
    info!(
        deleted_wrong_type = report.deleted_wrong_type,
        index_pruned = report.index_pruned,
        "coupon repair finished"
    );
    Json(RepairResponse { ok: true, report })
}

// =============================================================================
// OVERRIDES
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideView {
    #[serde(flatten)]
    entry: OverrideEntry,
    expires_in_seconds: Option<i64>,
}

impl From<OverrideEntry> for OverrideView {
    fn from(entry: OverrideEntry) -> Self {
        let expires_in_seconds = entry.ms_remaining.map(|ms| (ms.max(0) + 999) / 1000);
        Self { entry, expires_in_seconds }
    }
}

#[derive(Deserialize)]
pub struct IpQuery {
    ip: Option<String>,
}

/// `GET /api/admin/overrides`: live overrides, soonest to expire first.
pub async fn list_overrides(_admin: AdminKey, State(state): State<AppState>) -> Json<Value> {
    let overrides: Vec<OverrideView> = state
        .overrides
        .list_alive()
        .await
        .into_iter()
        .map(OverrideView::from)
        .collect();
    Json(json!({ "overrides": overrides }))
}

/// `POST /api/admin/overrides`: grant `ip` an override of `minutes` and
/// `uses`. All three fields are required.
pub async fn grant_override(_admin: AdminKey, State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let body: Value = parse_body(&body);
    let ip = string_field(&body, "ip").trim();
    if ip.is_empty() {
        return Err(override_error(&OverrideError::MissingIp));
    }
    let minutes = count_field(&body, "minutes", OverrideError::InvalidMinutes)?;
    let uses = count_field(&body, "uses", OverrideError::InvalidUses)?;
    let (Some(minutes), Some(uses)) = (minutes, uses) else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "E_MISSING_FIELD",
            "ip, minutes and uses are required",
        ));
    };
    state
        .overrides
        .grant(ip, OverrideGrant::limited(minutes, uses))
        .await
        .map_err(|e| override_error(&e))?;
    info!(%ip, minutes, uses, "override granted");
    let count = state.overrides.list_alive().await.len();
    Ok(Json(json!({ "ok": true, "count": count })))
}

/// `DELETE /api/admin/overrides?ip=...`
pub async fn release_override(
    _admin: AdminKey,
    State(state): State<AppState>,
    Query(query): Query<IpQuery>,
) -> Result<Json<Value>, ApiError> {
    let Some(ip) = query.ip.filter(|ip| !ip.trim().is_empty()) else {
        return Err(override_error(&OverrideError::MissingIp));
    };
    let released = state
        .overrides
        .release(ip.trim())
        .await
        .map_err(|e| override_error(&e))?;
    let count = state.overrides.list_alive().await.len();
    Ok(Json(json!({ "ok": true, "released": released, "count": count })))
}

// =============================================================================
// SETTINGS
// =============================================================================

fn defaults_response(defaults: GlobalDefaults) -> Json<Value> {
    Json(json!({ "ok": true, "defaults": defaults }))
}

/// `GET /api/admin/settings`
pub async fn get_settings(_admin: AdminKey, State(state): State<AppState>) -> Json<Value> {
    defaults_response(state.defaults.get().await)
}

/// `POST /api/admin/settings`: `{defaultMinutes, defaultUses}`.
pub async fn save_settings(_admin: AdminKey, State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let body: Value = parse_body(&body);
    let next = GlobalDefaults::from_input(body.get("defaultMinutes"), body.get("defaultUses"))
        .map_err(|e| ApiError::from_error(StatusCode::BAD_REQUEST, &e))?;
    let saved = state.defaults.set(next).await;
    info!(default_minutes = saved.default_minutes, default_uses = saved.default_uses, "global defaults saved");
    Ok(defaults_response(saved))
}

/// `DELETE /api/admin/settings`: restore the built-in defaults.
pub async fn reset_settings(_admin: AdminKey, State(state): State<AppState>) -> Json<Value> {
    defaults_response(state.defaults.reset().await)
}

// =============================================================================
// STATS + EXPORTS
// =============================================================================

#[derive(Deserialize)]
pub struct DaysQuery {
    days: Option<String>,
}

impl DaysQuery {
    fn days_or(&self, fallback: u32) -> u32 {
        self.days
            .as_deref()
            .and_then(|d| d.trim().parse::<u32>().ok())
            .filter(|d| *d > 0)
            .unwrap_or(fallback)
            .min(crate::services::metrics::MAX_DAILY_DAYS)
    }
}

/// `GET /api/admin/stats`
pub async fn global_stats(_admin: AdminKey, State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "stats": state.metrics.global_stats().await }))
}

/// `GET /api/admin/stats/daily?days=N` (default 30)
pub async fn daily_stats(_admin: AdminKey, State(state): State<AppState>, Query(query): Query<DaysQuery>) -> Json<Value> {
    let days = query.days_or(DEFAULT_STATS_DAYS);
    let points = state.metrics.daily_stats(days).await;
    Json(json!({ "days": days, "points": points }))
}

/// `GET /api/admin/export/coupons`: CSV `code,minutes,uses`.
pub async fn export_coupons(_admin: AdminKey, State(state): State<AppState>) -> Response {
    let mut csv = String::from("code,minutes,uses\n");
    for coupon in state.coupons.list_all().await {
        csv.push_str(&format!("{},{},{}\n", csv_field(&coupon.code), coupon.minutes, coupon.uses));
    }
    csv_response("coupons.csv", csv)
}

/// `GET /api/admin/export/stats?days=N`: CSV `date,total` (default 60 days).
pub async fn export_stats(_admin: AdminKey, State(state): State<AppState>, Query(query): Query<DaysQuery>) -> Response {
    let days = query.days_or(DEFAULT_EXPORT_DAYS);
    let mut csv = String::from("date,total\n");
    for point in state.metrics.daily_stats(days).await {
        csv.push_str(&format!("{},{}\n", point.date, point.stats.total));
    }
    csv_response("stats_daily.csv", csv)
}

fn csv_response(filename: &str, csv: String) -> Response {
    let disposition = format!("attachment; filename=\"{filename}\"");
    (
        [(CONTENT_TYPE, "text/csv; charset=utf-8"), (CONTENT_DISPOSITION, disposition.as_str())],
        csv,
    )
        .into_response()
}

/// Quote a CSV field when it contains a delimiter, quote, or line break.
pub(crate) fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_owned()
    }
}

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// `GET /api/admin/diag`: backend in use and coupon count.
pub async fn diag(_admin: AdminKey, State(state): State<AppState>) -> Json<Value> {
    let coupons = state.coupons.list_all().await;
    Json(json!({
        "ok": true,
        "storage": state.kv.kind(),
        "couponsCount": coupons.len(),
        "codeVersion": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
#[path = "admin_test.rs"]
mod tests;
