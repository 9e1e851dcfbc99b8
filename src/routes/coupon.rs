//! Coupon routes: visitor-facing override status and redemption.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, parse_body};
use crate::client_ip::resolve_client_ip;
use crate::services::overrides::{OverrideGrant, OverrideStatus};
use crate::state::AppState;

#[derive(Serialize)]
pub struct StatusResponse {
    ok: bool,
    ip: String,
    #[serde(flatten)]
    status: OverrideStatus,
}

/// `GET /api/coupon`: whether the caller currently holds a live override.
pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> Json<StatusResponse> {
    let ip = resolve_client_ip(&headers);
    let status = state.overrides.status(&ip).await;
    Json(StatusResponse { ok: true, ip, status })
}

#[derive(Default, Deserialize)]
pub struct RedeemBody {
    code: Option<String>,
}

#[derive(Serialize)]
pub struct RedeemResponse {
    ok: bool,
    unlocked: bool,
    ip: String,
    minutes: u32,
    uses: u32,
}

/// `POST /api/coupon`: trade a coupon code for an override on the caller's ip.
pub async fn redeem(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RedeemResponse>, ApiError> {
    let body: RedeemBody = parse_body(&body);
    let Some(code) = body.code.filter(|c| !c.trim().is_empty()) else {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "E_MISSING_CODE", "Missing code."));
    };

    let Some(template) = state.coupons.lookup(&code).await else {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "E_INVALID_CODE", "Invalid or expired code."));
    };

    let ip = resolve_client_ip(&headers);
    state
        .overrides
        .grant(&ip, OverrideGrant::limited(template.minutes, template.uses))
        .await
        .map_err(|e| ApiError::from_error(StatusCode::SERVICE_UNAVAILABLE, &e))?;

    info!(%ip, minutes = template.minutes, uses = template.uses, "coupon unlocked");
    Ok(Json(RedeemResponse { ok: true, unlocked: true, ip, minutes: template.minutes, uses: template.uses }))
}
