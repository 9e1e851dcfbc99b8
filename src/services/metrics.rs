//! Usage metrics: increment-only generation counters.
//!
//! DESIGN
//! ======
//! Counters live in two kinds of hashes: `metrics:global` and one
//! `metrics:daily:YYYY-MM-DD` per UTC day. Fields are `total` plus
//! `<scope>::<value>` for each categorical request attribute.
//!
//! ERROR HANDLING
//! ==============
//! Recording issues all twelve increments concurrently and ignores individual
//! failures, so one bad write never drops the others. Reads degrade to zeroed
//! stats.

use std::collections::{BTreeMap, HashMap};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tracing::warn;

use crate::kv::SharedKv;

pub const GLOBAL_KEY: &str = "metrics:global";
pub const DAILY_PREFIX: &str = "metrics:daily:";
pub const MAX_DAILY_DAYS: u32 = 365;

const TOTAL_FIELD: &str = "total";

/// Categorical attributes of one generation request. Missing fields take
/// the form's initial selections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationMeta {
    pub age: String,
    pub genre: String,
    pub length: String,
    pub level: String,
    pub period: String,
}

impl Default for GenerationMeta {
    fn default() -> Self {
        Self {
            age: "Teens 14–17".to_owned(),
            genre: "Comedy".to_owned(),
            length: "Medium (45–60s)".to_owned(),
            level: "Beginner".to_owned(),
            period: "Contemporary".to_owned(),
        }
    }
}

impl GenerationMeta {
    /// Replace empty selections with the form defaults. Query strings send
    /// `age=` for an untouched field, which should not count as a value.
    #[must_use]
    pub fn with_blank_defaults(self) -> Self {
        let defaults = Self::default();
        let pick = |value: String, fallback: String| if value.trim().is_empty() { fallback } else { value };
        Self {
            age: pick(self.age, defaults.age),
            genre: pick(self.genre, defaults.genre),
            length: pick(self.length, defaults.length),
            level: pick(self.level, defaults.level),
            period: pick(self.period, defaults.period),
        }
    }

    fn fields(&self) -> [String; 6] {
        [
            TOTAL_FIELD.to_owned(),
            scoped("age", &self.age),
            scoped("genre", &self.genre),
            scoped("length", &self.length),
            scoped("level", &self.level),
            scoped("period", &self.period),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total: i64,
    pub by_age: BTreeMap<String, i64>,
    pub by_genre: BTreeMap<String, i64>,
    pub by_length: BTreeMap<String, i64>,
    pub by_level: BTreeMap<String, i64>,
    pub by_period: BTreeMap<String, i64>,
}

impl Stats {
    fn from_fields(raw: HashMap<String, i64>) -> Self {
        let mut stats = Self::default();
        for (field, count) in raw {
            if field == TOTAL_FIELD {
                stats.total = count;
                continue;
            }
            let Some((scope, value)) = field.split_once("::") else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let bucket = match scope {
                "age" => &mut stats.by_age,
                "genre" => &mut stats.by_genre,
                "length" => &mut stats.by_length,
                "level" => &mut stats.by_level,
                "period" => &mut stats.by_period,
                _ => continue,
            };
            bucket.insert(value.to_owned(), count);
        }
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyPoint {
    /// UTC date, `YYYY-MM-DD`.
    pub date: String,
    #[serde(flatten)]
    pub stats: Stats,
}

fn scoped(scope: &str, value: &str) -> String {
    format!("{scope}::{value}")
}

fn daily_key(date: Date) -> String {
    format!("{DAILY_PREFIX}{date}")
}

fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

/// The trailing `days` UTC dates ending at `today`, oldest first.
pub(crate) fn trailing_dates(today: Date, days: u32) -> Vec<Date> {
    let n = days.clamp(1, MAX_DAILY_DAYS);
    (0..n)
        .rev()
        .filter_map(|back| today.checked_sub(time::Duration::days(i64::from(back))))
        .collect()
}

#[derive(Clone)]
pub struct MetricsStore {
    kv: SharedKv,
}

impl MetricsStore {
    #[must_use]
    pub fn new(kv: SharedKv) -> Self {
        Self { kv }
    }

    /// Count one generation in the global and today's buckets.
    pub async fn record(&self, meta: &GenerationMeta) {
        self.record_on(meta, today_utc()).await;
    }

    pub(crate) async fn record_on(&self, meta: &GenerationMeta, date: Date) {
        let daily = daily_key(date);
        let fields = meta.fields();
        let writes = [GLOBAL_KEY, daily.as_str()]
            .into_iter()
            .flat_map(|key| fields.iter().map(move |field| (key, field.as_str())));

        let results = join_all(writes.map(|(key, field)| async move {
            (key, field, self.kv.incr_field(key, field, 1).await)
        }))
        .await;

        for (key, field, result) in results {
            if let Err(e) = result {
                warn!(%key, %field, error = %e, "metric increment failed");
            }
        }
    }

    pub async fn global_stats(&self) -> Stats {
        self.read_stats(GLOBAL_KEY).await
    }

    /// One point per UTC day over the trailing `days` (clamped to 1..=365),
    /// oldest first, zero-filled.
    pub async fn daily_stats(&self, days: u32) -> Vec<DailyPoint> {
        self.daily_stats_on(days, today_utc()).await
    }

    pub(crate) async fn daily_stats_on(&self, days: u32, today: Date) -> Vec<DailyPoint> {
        let dates = trailing_dates(today, days);
        let stats = join_all(dates.iter().map(|&date| async move { self.read_stats(&daily_key(date)).await })).await;
        dates
            .into_iter()
            .zip(stats)
            .map(|(date, stats)| DailyPoint { date: date.to_string(), stats })
            .collect()
    }

    async fn read_stats(&self, key: &str) -> Stats {
        match self.kv.fields_of(key).await {
            Ok(raw) => Stats::from_fields(raw),
            Err(e) => {
                warn!(%key, error = %e, "metric read failed");
                Stats::default()
            }
        }
    }
}

#[cfg(test)]
#[path = "metrics_test.rs"]
mod tests;
