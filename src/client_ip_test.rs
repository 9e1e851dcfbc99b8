use super::*;
use axum::http::HeaderValue;

fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.insert(*name, HeaderValue::from_static(value));
    }
    map
}

#[test]
fn forwarded_for_takes_first_entry() {
    let h = headers(&[("x-forwarded-for", " 1.2.3.4 , 10.0.0.1"), ("cf-connecting-ip", "5.5.5.5")]);
    assert_eq!(resolve_client_ip(&h), "1.2.3.4");
}

#[test]
fn falls_back_through_header_priority() {
    let h = headers(&[("cf-connecting-ip", "5.5.5.5"), ("x-real-ip", "6.6.6.6")]);
    assert_eq!(resolve_client_ip(&h), "5.5.5.5");

    let h = headers(&[("x-real-ip", "6.6.6.6")]);
    assert_eq!(resolve_client_ip(&h), "6.6.6.6");
}

#[test]
fn empty_forwarded_for_is_skipped() {
    let h = headers(&[("x-forwarded-for", " , 9.9.9.9"), ("x-real-ip", "6.6.6.6")]);
    assert_eq!(resolve_client_ip(&h), "6.6.6.6");
}

#[test]
fn no_headers_is_unknown() {
    assert_eq!(resolve_client_ip(&HeaderMap::new()), UNKNOWN_IP);
}
