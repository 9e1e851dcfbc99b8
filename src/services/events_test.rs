use super::*;
use serde_json::json;

#[test]
fn counted_events_start_at_zero() {
    let snapshot = EventTracker::new().snapshot();
    assert_eq!(snapshot.counts.get("pageview"), Some(&0));
    assert_eq!(snapshot.counts.get("generate_clicked"), Some(&0));
    assert!(snapshot.recent.is_empty());
    assert!(!snapshot.started_at.is_empty());
}

#[test]
fn record_counts_known_events_only() {
    let tracker = EventTracker::new();
    tracker.record("pageview", "1.1.1.1", json!({}));
    tracker.record("pageview", "1.1.1.1", json!({}));
    tracker.record("generate_clicked", "2.2.2.2", json!({ "genre": "Drama" }));
    tracker.record("scrolled", "3.3.3.3", json!(null));

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.counts.get("pageview"), Some(&2));
    assert_eq!(snapshot.counts.get("generate_clicked"), Some(&1));
    assert_eq!(snapshot.counts.get("scrolled"), None);
    assert_eq!(snapshot.recent.len(), 4);
}

#[test]
fn recent_is_newest_first() {
    let tracker = EventTracker::new();
    tracker.record("a", "ip", json!({}));
    let latest = tracker.record("b", "ip", json!({ "n": 2 }));

    let recent = tracker.snapshot().recent;
    assert_eq!(recent[0], latest);
    assert_eq!(recent[1].event, "a");
}

#[test]
fn ring_is_capped_and_snapshot_is_trimmed() {
    let tracker = EventTracker::new();
    for i in 0..(RECENT_CAPACITY + 25) {
        tracker.record("pageview", "ip", json!({ "i": i }));
    }

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.counts.get("pageview"), Some(&((RECENT_CAPACITY + 25) as u64)));
    assert_eq!(snapshot.recent.len(), RECENT_IN_SNAPSHOT);
    assert_eq!(snapshot.recent[0].data, json!({ "i": RECENT_CAPACITY + 24 }));

    let log = tracker.log.lock().unwrap();
    assert_eq!(log.recent.len(), RECENT_CAPACITY);
    assert_eq!(log.recent.back().unwrap().data, json!({ "i": 25 }));
}

#[test]
fn clones_share_the_log() {
    let tracker = EventTracker::new();
    tracker.clone().record("pageview", "ip", json!({}));
    assert_eq!(tracker.snapshot().counts.get("pageview"), Some(&1));
}
