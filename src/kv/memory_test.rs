use super::*;
use std::time::Duration;

#[tokio::test]
async fn get_set_delete_string() {
    let kv = MemoryStore::new();
    assert_eq!(kv.get("a").await.unwrap(), None);
    kv.set("a", "1").await.unwrap();
    assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
    assert!(kv.exists("a").await.unwrap());
    assert!(kv.delete("a").await.unwrap());
    assert!(!kv.delete("a").await.unwrap());
    assert!(!kv.exists("a").await.unwrap());
}

#[tokio::test]
async fn clones_share_state() {
    let kv = MemoryStore::new();
    let other = kv.clone();
    kv.set("shared", "yes").await.unwrap();
    assert_eq!(other.get("shared").await.unwrap().as_deref(), Some("yes"));
}

#[tokio::test]
async fn set_members_add_and_remove() {
    let kv = MemoryStore::new();
    kv.add_member("idx", "b").await.unwrap();
    kv.add_member("idx", "a").await.unwrap();
    kv.add_member("idx", "a").await.unwrap();
    assert_eq!(kv.members_of("idx").await.unwrap(), vec!["a", "b"]);

    kv.remove_member("idx", "a").await.unwrap();
    kv.remove_member("idx", "missing").await.unwrap();
    assert_eq!(kv.members_of("idx").await.unwrap(), vec!["b"]);

    kv.remove_member("idx", "b").await.unwrap();
    assert_eq!(kv.type_of("idx").await.unwrap(), KeyType::None);
}

#[tokio::test]
async fn wrong_type_access_is_rejected() {
    let kv = MemoryStore::new();
    kv.add_member("s", "x").await.unwrap();
    assert!(matches!(kv.get("s").await, Err(KvError::WrongType { .. })));
    assert!(matches!(kv.incr_field("s", "f", 1).await, Err(KvError::WrongType { .. })));

    kv.set("str", "v").await.unwrap();
    assert!(matches!(kv.members_of("str").await, Err(KvError::WrongType { .. })));
    assert!(matches!(kv.add_member("str", "m").await, Err(KvError::WrongType { .. })));
    assert!(matches!(kv.fields_of("str").await, Err(KvError::WrongType { .. })));
}

#[tokio::test]
async fn set_overwrites_wrong_type() {
    let kv = MemoryStore::new();
    kv.add_member("k", "x").await.unwrap();
    kv.set("k", "plain").await.unwrap();
    assert_eq!(kv.type_of("k").await.unwrap(), KeyType::String);
}

#[tokio::test]
async fn type_of_reports_each_kind() {
    let kv = MemoryStore::new();
    kv.set("s", "v").await.unwrap();
    kv.add_member("m", "v").await.unwrap();
    kv.incr_field("h", "f", 1).await.unwrap();
    assert_eq!(kv.type_of("s").await.unwrap(), KeyType::String);
    assert_eq!(kv.type_of("m").await.unwrap(), KeyType::Set);
    assert_eq!(kv.type_of("h").await.unwrap(), KeyType::Hash);
    assert_eq!(kv.type_of("nope").await.unwrap(), KeyType::None);
}

#[tokio::test]
async fn scan_prefix_matches_only_prefix() {
    let kv = MemoryStore::new();
    kv.set("coupon:a", "1").await.unwrap();
    kv.set("coupon:b", "1").await.unwrap();
    kv.set("override:1.2.3.4", "1").await.unwrap();
    let mut keys = kv.scan_prefix("coupon:").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["coupon:a", "coupon:b"]);
}

#[tokio::test]
async fn incr_field_accumulates() {
    let kv = MemoryStore::new();
    assert_eq!(kv.incr_field("h", "total", 1).await.unwrap(), 1);
    assert_eq!(kv.incr_field("h", "total", 2).await.unwrap(), 3);
    let fields = kv.fields_of("h").await.unwrap();
    assert_eq!(fields.get("total"), Some(&3));
    assert!(kv.fields_of("empty").await.unwrap().is_empty());
}

#[tokio::test]
async fn compare_and_swap_only_on_match() {
    let kv = MemoryStore::new();
    assert!(!kv.compare_and_swap("k", "old", Some("new")).await.unwrap());

    kv.set("k", "old").await.unwrap();
    assert!(!kv.compare_and_swap("k", "other", Some("new")).await.unwrap());
    assert!(kv.compare_and_swap("k", "old", Some("new")).await.unwrap());
    assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("new"));

    assert!(kv.compare_and_swap("k", "new", None).await.unwrap());
    assert_eq!(kv.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn set_if_absent_writes_once() {
    let kv = MemoryStore::new();
    let ttl = Duration::from_secs(60);
    assert!(kv.set_if_absent("marker", "1", ttl).await.unwrap());
    assert!(!kv.set_if_absent("marker", "2", ttl).await.unwrap());
    assert_eq!(kv.get("marker").await.unwrap().as_deref(), Some("1"));
}

#[tokio::test]
async fn set_if_absent_key_expires() {
    let kv = MemoryStore::new();
    assert!(kv.set_if_absent("marker", "1", Duration::from_millis(20)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(!kv.exists("marker").await.unwrap());
    assert!(kv.set_if_absent("marker", "1", Duration::from_millis(20)).await.unwrap());
}

#[tokio::test]
async fn overwrite_clears_ttl() {
    let kv = MemoryStore::new();
    kv.set_if_absent("k", "short", Duration::from_millis(20)).await.unwrap();
    kv.set("k", "kept").await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("kept"));
}

#[tokio::test]
async fn memory_kind() {
    assert_eq!(MemoryStore::new().kind(), BackendKind::Memory);
}
