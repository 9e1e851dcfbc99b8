use super::*;

use axum::body::{Body, to_bytes};
use axum::http::Request;
use tower::ServiceExt;

use crate::routes::app;
use crate::state::test_helpers::{TEST_ADMIN_KEY, test_app_state};

fn admin(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(ADMIN_KEY_HEADER, TEST_ADMIN_KEY)
        .header("content-type", "application/json")
        .body(Body::from(body.to_owned()))
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn json_body(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

// =============================================================================
// auth
// =============================================================================

#[tokio::test]
async fn missing_or_wrong_key_is_unauthorized() {
    let app = app(test_app_state());

    let request = Request::builder()
        .uri("/api/admin/coupons")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "x-admin-key header missing");

    let request = Request::builder()
        .uri("/api/admin/coupons")
        .header(ADMIN_KEY_HEADER, "wrong")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
}

#[tokio::test]
async fn unconfigured_admin_key_rejects_everyone() {
    let mut state = test_app_state();
    state.admin_key = None;
    let response = app(state)
        .oneshot(admin("GET", "/api/admin/stats", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// coupons
// =============================================================================

#[tokio::test]
async fn coupon_crud_round() {
    let state = test_app_state();
    let app = app(state.clone());

    let response = app
        .clone()
        .oneshot(admin("POST", "/api/admin/coupons", r#"{"code":"Spring","minutes":45,"uses":3}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
    assert_eq!(json_body(response).await["coupon"]["code"], "spring");

    let response = app
        .clone()
        .oneshot(admin("GET", "/api/admin/coupons", ""))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["coupons"], serde_json::json!([{ "code": "spring", "minutes": 45, "uses": 3 }]));

    let response = app
        .oneshot(admin("DELETE", "/api/admin/coupons?code=SPRING", ""))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["deleted"], true);
    assert!(state.coupons.list_all().await.is_empty());
}

#[tokio::test]
async fn coupon_upsert_validates_fields() {
    let app = app(test_app_state());
    let response = app
        .clone()
        .oneshot(admin("POST", "/api/admin/coupons", r#"{"code":"x","minutes":-5,"uses":3}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "E_INVALID_MINUTES");

    let response = app
        .oneshot(admin("DELETE", "/api/admin/coupons", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn coupon_upsert_coerces_numeric_strings() {
    let state = test_app_state();
    let response = app(state.clone())
        .oneshot(admin("POST", "/api/admin/coupons", r#"{"code":"Spring","minutes":"60","uses":5}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await["coupon"],
        serde_json::json!({ "code": "spring", "minutes": 60, "uses": 5 })
    );
    assert!(state.coupons.lookup("spring").await.is_some());
}

#[tokio::test]
async fn coupon_upsert_reports_which_count_is_malformed() {
    let app = app(test_app_state());
    let cases = [
        (r#"{"code":"x","minutes":"abc","uses":3}"#, "E_INVALID_MINUTES"),
        (r#"{"code":"x","minutes":1.5,"uses":3}"#, "E_INVALID_MINUTES"),
        (r#"{"code":"x","minutes":30,"uses":"many"}"#, "E_INVALID_USES"),
        (r#"{"code":"x","minutes":30}"#, "E_INVALID_USES"),
        (r#"{"minutes":30,"uses":3}"#, "E_MISSING_CODE"),
    ];
    for (body, code) in cases {
        let response = app
            .clone()
            .oneshot(admin("POST", "/api/admin/coupons", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(json_body(response).await["code"], code, "{body}");
    }
}

#[tokio::test]
async fn repair_reports_counts() {
    let state = test_app_state();
    state.kv.add_member("coupon:bad", "x").await.unwrap();
    let response = app(state)
        .oneshot(admin("POST", "/api/admin/coupons/repair", ""))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["deletedWrongType"], 1);
    assert_eq!(body["checkedKeys"], 1);
}

// =============================================================================
// overrides
// =============================================================================

#[tokio::test]
async fn override_grant_list_release() {
    let state = test_app_state();
    let app = app(state.clone());

    let response = app
        .clone()
        .oneshot(admin("POST", "/api/admin/overrides", r#"{"ip":"5.6.7.8","minutes":10,"uses":4}"#))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["count"], 1);

    let response = app
        .clone()
        .oneshot(admin("GET", "/api/admin/overrides", ""))
        .await
        .unwrap();
    let body = json_body(response).await;
    let entry = &body["overrides"][0];
    assert_eq!(entry["ip"], "5.6.7.8");
    assert_eq!(entry["remaining"], 4);
    assert!(entry["millisecondsRemaining"].as_i64().unwrap() <= 600_000);
    assert!(entry["expiresInSeconds"].as_i64().unwrap() <= 600);

    let response = app
        .oneshot(admin("DELETE", "/api/admin/overrides?ip=5.6.7.8", ""))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["released"], true);
    assert_eq!(body["count"], 0);
    assert!(!state.overrides.is_alive("5.6.7.8").await);
}

#[tokio::test]
async fn override_grant_requires_minutes_and_uses() {
    let state = test_app_state();
    let app = app(state.clone());
    for body in [r#"{"ip":"9.9.9.9"}"#, r#"{"ip":"9.9.9.9","minutes":10}"#, r#"{"ip":"9.9.9.9","uses":"  "}"#] {
        let response = app
            .clone()
            .oneshot(admin("POST", "/api/admin/overrides", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        let body = json_body(response).await;
        assert_eq!(body["code"], "E_MISSING_FIELD");
        assert_eq!(body["error"], "ip, minutes and uses are required");
    }
    assert!(!state.overrides.is_alive("9.9.9.9").await);
}

#[tokio::test]
async fn override_grant_coerces_numeric_strings() {
    let state = test_app_state();
    let response = app(state.clone())
        .oneshot(admin("POST", "/api/admin/overrides", r#"{"ip":"5.6.7.8","minutes":"15","uses":"2"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = state.overrides.status("5.6.7.8").await;
    assert_eq!(status.remaining, Some(2));
    assert!(status.seconds_left.is_some_and(|s| s <= 15 * 60));
}

#[tokio::test]
async fn override_grant_rejects_malformed_counts() {
    let app = app(test_app_state());
    let response = app
        .clone()
        .oneshot(admin("POST", "/api/admin/overrides", r#"{"ip":"5.6.7.8","minutes":"soon","uses":2}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "E_INVALID_MINUTES");

    let response = app
        .oneshot(admin("POST", "/api/admin/overrides", r#"{"ip":"5.6.7.8","minutes":5,"uses":0.5}"#))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["code"], "E_INVALID_USES");
}

#[tokio::test]
async fn override_grant_requires_ip() {
    let response = app(test_app_state())
        .oneshot(admin("POST", "/api/admin/overrides", r#"{"minutes":10}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "E_MISSING_IP");
}

// =============================================================================
// settings
// =============================================================================

#[tokio::test]
async fn settings_save_and_reset() {
    let app = app(test_app_state());

    let response = app
        .clone()
        .oneshot(admin("POST", "/api/admin/settings", r#"{"defaultMinutes":"120","defaultUses":5}"#))
        .await
        .unwrap();
    assert_eq!(
        json_body(response).await["defaults"],
        serde_json::json!({ "defaultMinutes": 120, "defaultUses": 5 })
    );

    let response = app
        .clone()
        .oneshot(admin("GET", "/api/admin/settings", ""))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["defaults"]["defaultMinutes"], 120);

    let response = app
        .oneshot(admin("DELETE", "/api/admin/settings", ""))
        .await
        .unwrap();
    assert_eq!(
        json_body(response).await["defaults"],
        serde_json::json!({ "defaultMinutes": 60, "defaultUses": 5 })
    );
}

#[tokio::test]
async fn settings_reject_bad_input() {
    let response = app(test_app_state())
        .oneshot(admin("POST", "/api/admin/settings", r#"{"defaultMinutes":-1,"defaultUses":5}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "E_INVALID_FIELD");
}

// =============================================================================
// stats + exports
// =============================================================================

#[tokio::test]
async fn daily_stats_clamps_days() {
    let response = app(test_app_state())
        .oneshot(admin("GET", "/api/admin/stats/daily?days=9999", ""))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["days"], 365);
    assert_eq!(body["points"].as_array().unwrap().len(), 365);
}

#[tokio::test]
async fn daily_stats_defaults_to_thirty_days() {
    let response = app(test_app_state())
        .oneshot(admin("GET", "/api/admin/stats/daily?days=abc", ""))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["days"], 30);
}

#[tokio::test]
async fn exports_are_csv() {
    let state = test_app_state();
    state.coupons.upsert("vip", 30, 2).await.unwrap();
    let app = app(state);

    let response = app
        .clone()
        .oneshot(admin("GET", "/api/admin/export/coupons", ""))
        .await
        .unwrap();
    assert_eq!(response.headers()[CONTENT_TYPE], "text/csv; charset=utf-8");
    assert_eq!(body_text(response).await, "code,minutes,uses\nvip,30,2\n");

    let response = app
        .oneshot(admin("GET", "/api/admin/export/stats?days=2", ""))
        .await
        .unwrap();
    assert_eq!(response.headers()[CONTENT_DISPOSITION], "attachment; filename=\"stats_daily.csv\"");
    let csv = body_text(response).await;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "date,total");
    assert!(lines[1].ends_with(",0"));
}

#[test]
fn csv_field_quotes_when_needed() {
    assert_eq!(csv_field("plain"), "plain");
    assert_eq!(csv_field("a,b"), "\"a,b\"");
    assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
}

#[tokio::test]
async fn diag_reports_backend() {
    let response = app(test_app_state())
        .oneshot(admin("GET", "/api/admin/diag", ""))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["storage"], "memory");
    assert_eq!(body["couponsCount"], 0);
}
