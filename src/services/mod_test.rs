use super::*;
use serde_json::json;

#[test]
fn parse_count_accepts_numbers_and_numeric_strings() {
    assert_eq!(parse_count(Some(&json!(60))), Ok(Some(60)));
    assert_eq!(parse_count(Some(&json!(30.0))), Ok(Some(30)));
    assert_eq!(parse_count(Some(&json!("60"))), Ok(Some(60)));
    assert_eq!(parse_count(Some(&json!(" 7 "))), Ok(Some(7)));
    assert_eq!(parse_count(Some(&json!(0))), Ok(Some(0)));
}

#[test]
fn parse_count_treats_absent_and_blank_as_none() {
    assert_eq!(parse_count(None), Ok(None));
    assert_eq!(parse_count(Some(&Value::Null)), Ok(None));
    assert_eq!(parse_count(Some(&json!("  "))), Ok(None));
}

#[test]
fn parse_count_rejects_non_counts() {
    for bad in [json!("abc"), json!(1.5), json!("1.5"), json!(-1), json!("-3"), json!(true), json!([1]), json!(5_000_000_000_u64)] {
        assert_eq!(parse_count(Some(&bad)), Err(InvalidCount), "{bad} should be rejected");
    }
}
