//! Client event tracker: page views and button clicks reported by the UI.
//!
//! DESIGN
//! ======
//! Everything is in-process and resets on restart. `pageview` and
//! `generate_clicked` are counted; every event, counted or not, is pushed to
//! the front of a ring holding the most recent [`RECENT_CAPACITY`] events.
//! Snapshots return only the newest [`RECENT_IN_SNAPSHOT`] of those.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const COUNTED_EVENTS: [&str; 2] = ["pageview", "generate_clicked"];
pub const RECENT_CAPACITY: usize = 200;
pub const RECENT_IN_SNAPSHOT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientEvent {
    pub ts: String,
    pub event: String,
    pub ip: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSnapshot {
    pub started_at: String,
    pub uptime_sec: u64,
    pub counts: BTreeMap<String, u64>,
    /// Newest first.
    pub recent: Vec<ClientEvent>,
}

struct EventLog {
    counts: BTreeMap<String, u64>,
    recent: VecDeque<ClientEvent>,
}

#[derive(Clone)]
pub struct EventTracker {
    started_at: String,
    started: Instant,
    log: Arc<Mutex<EventLog>>,
}

impl EventTracker {
    #[must_use]
    pub fn new() -> Self {
        let counts = COUNTED_EVENTS.iter().map(|name| ((*name).to_owned(), 0)).collect();
        Self {
            started_at: rfc3339(OffsetDateTime::now_utc()),
            started: Instant::now(),
            log: Arc::new(Mutex::new(EventLog { counts, recent: VecDeque::with_capacity(RECENT_CAPACITY) })),
        }
    }

    /// Store one event and return it as recorded.
    pub fn record(&self, event: &str, ip: &str, data: Value) -> ClientEvent {
        let entry = ClientEvent {
            ts: rfc3339(OffsetDateTime::now_utc()),
            event: event.to_owned(),
            ip: ip.to_owned(),
            data,
        };

        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = log.counts.get_mut(event) {
            *count += 1;
        }
        log.recent.push_front(entry.clone());
        log.recent.truncate(RECENT_CAPACITY);
        entry
    }

    #[must_use]
    pub fn snapshot(&self) -> EventSnapshot {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        EventSnapshot {
            started_at: self.started_at.clone(),
            uptime_sec: self.started.elapsed().as_secs(),
            counts: log.counts.clone(),
            recent: log.recent.iter().take(RECENT_IN_SNAPSHOT).cloned().collect(),
        }
    }
}

impl Default for EventTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_default()
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
