//! Client address resolution behind proxies.

use axum::http::HeaderMap;

pub const UNKNOWN_IP: &str = "unknown";

/// First address in `x-forwarded-for`, else `cf-connecting-ip`, else
/// `x-real-ip`, else [`UNKNOWN_IP`]. Empty or non-UTF-8 values are skipped.
#[must_use]
pub fn resolve_client_ip(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header("x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .or_else(|| header("cf-connecting-ip"))
        .or_else(|| header("x-real-ip"))
        .unwrap_or(UNKNOWN_IP)
        .to_owned()
}

#[cfg(test)]
#[path = "client_ip_test.rs"]
mod tests;
