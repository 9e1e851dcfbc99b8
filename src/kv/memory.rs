//! Process-local backend used when no durable store is configured.
//!
//! State lives for the lifetime of the `MemoryStore` value (normally the
//! process). Clones share the same map.
//!
//! Keys written with a TTL are dropped lazily: every lock first evicts
//! whatever has passed its deadline. As in Redis, overwriting or deleting a
//! key clears its TTL.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{BackendKind, KeyType, KvError, KvStore};

enum Entry {
    Str(String),
    Set(BTreeSet<String>),
    Hash(HashMap<String, i64>),
}

impl Entry {
    fn key_type(&self) -> KeyType {
        match self {
            Self::Str(_) => KeyType::String,
            Self::Set(_) => KeyType::Set,
            Self::Hash(_) => KeyType::Hash,
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    expiry: HashMap<String, Instant>,
    /// Deadline order for eviction. May hold stale pairs for keys whose TTL
    /// was since cleared; `expiry` is authoritative.
    deadlines: BTreeSet<(Instant, String)>,
}

impl Inner {
    fn evict_expired(&mut self, now: Instant) {
        while let Some((deadline, key)) = self.deadlines.first().cloned() {
            if deadline > now {
                break;
            }
            self.deadlines.pop_first();
            if self.expiry.get(&key) == Some(&deadline) {
                self.expiry.remove(&key);
                self.entries.remove(&key);
            }
        }
    }

    fn insert(&mut self, key: &str, entry: Entry) {
        self.expiry.remove(key);
        self.entries.insert(key.to_owned(), entry);
    }

    fn remove(&mut self, key: &str) -> bool {
        self.expiry.remove(key);
        self.entries.remove(key).is_some()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.evict_expired(Instant::now());
        inner
    }
}

fn wrong_type(key: &str) -> KvError {
    KvError::WrongType { key: key.to_owned() }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        match self.lock().entries.get(key) {
            None => Ok(None),
            Some(Entry::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        // SET replaces whatever was there, like Redis.
        self.lock().insert(key, Entry::Str(value.to_owned()));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut inner = self.lock();
        if inner.entries.contains_key(key) {
            return Ok(false);
        }
        let deadline = Instant::now() + ttl;
        inner.insert(key, Entry::Str(value.to_owned()));
        inner.expiry.insert(key.to_owned(), deadline);
        inner.deadlines.insert((deadline, key.to_owned()));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.lock().remove(key))
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.lock().entries.contains_key(key))
    }

    async fn members_of(&self, set_key: &str) -> Result<Vec<String>, KvError> {
        match self.lock().entries.get(set_key) {
            None => Ok(Vec::new()),
            Some(Entry::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(wrong_type(set_key)),
        }
    }

    async fn add_member(&self, set_key: &str, member: &str) -> Result<(), KvError> {
        let mut inner = self.lock();
        let entry = inner
            .entries
            .entry(set_key.to_owned())
            .or_insert_with(|| Entry::Set(BTreeSet::new()));
        let Entry::Set(members) = entry else {
            return Err(wrong_type(set_key));
        };
        members.insert(member.to_owned());
        Ok(())
    }

    async fn remove_member(&self, set_key: &str, member: &str) -> Result<(), KvError> {
        let mut inner = self.lock();
        match inner.entries.get_mut(set_key) {
            None => Ok(()),
            Some(Entry::Set(members)) => {
                members.remove(member);
                if members.is_empty() {
                    inner.remove(set_key);
                }
                Ok(())
            }
            Some(_) => Err(wrong_type(set_key)),
        }
    }

    async fn type_of(&self, key: &str) -> Result<KeyType, KvError> {
        Ok(self.lock().entries.get(key).map_or(KeyType::None, Entry::key_type))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        Ok(self
            .lock()
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn incr_field(&self, key: &str, field: &str, by: i64) -> Result<i64, KvError> {
        let mut inner = self.lock();
        let entry = inner
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        let Entry::Hash(fields) = entry else {
            return Err(wrong_type(key));
        };
        let count = fields.entry(field.to_owned()).or_insert(0);
        *count += by;
        Ok(*count)
    }

    async fn fields_of(&self, key: &str) -> Result<HashMap<String, i64>, KvError> {
        match self.lock().entries.get(key) {
            None => Ok(HashMap::new()),
            Some(Entry::Hash(fields)) => Ok(fields.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: Option<&str>) -> Result<bool, KvError> {
        let mut inner = self.lock();
        match inner.entries.get(key) {
            Some(Entry::Str(current)) if current == expected => {}
            Some(Entry::Str(_)) | None => return Ok(false),
            Some(_) => return Err(wrong_type(key)),
        }
        match new {
            Some(value) => inner.insert(key, Entry::Str(value.to_owned())),
            None => {
                inner.remove(key);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
