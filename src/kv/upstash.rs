//! Upstash Redis REST backend.
//!
//! Each operation is one `POST <base_url>` whose body is the Redis command as
//! a JSON array of strings. Upstash answers `{"result": ...}` on success and
//! `{"error": "..."}` on failure.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use super::{BackendKind, KeyType, KvError, KvStore};

const CONNECT_TIMEOUT_SECS: u64 = 5;
const SCAN_COUNT: &str = "100";

/// Swap `KEYS[1]` only while it still holds `ARGV[1]`. `ARGV[2] == "1"`
/// deletes instead of writing `ARGV[3]`.
const COMPARE_AND_SWAP_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if current ~= ARGV[1] then
  return 0
end
if ARGV[2] == '1' then
  redis.call('DEL', KEYS[1])
else
  redis.call('SET', KEYS[1], ARGV[3])
end
return 1
";

pub struct UpstashStore {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl UpstashStore {
    /// Build a REST client for the given Upstash database.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, token: &str, request_timeout_secs: u64) -> Result<Self, KvError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| KvError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned(), token: token.to_owned() })
    }

    async fn command(&self, args: &[&str]) -> Result<Value, KvError> {
        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await
            .map_err(|e| KvError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| KvError::Request(e.to_string()))?;
        let key_index = if args.first() == Some(&"EVAL") { 3 } else { 1 };
        let key = args.get(key_index).copied().unwrap_or_default();
        parse_response(status, &text, key)
    }
}

// =============================================================================
// RESPONSE DECODING
// =============================================================================

pub(crate) fn parse_response(status: u16, body: &str, key: &str) -> Result<Value, KvError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| KvError::Protocol(format!("status {status}: invalid JSON body: {e}")))?;
    if let Some(message) = json.get("error").and_then(Value::as_str) {
        if message.starts_with("WRONGTYPE") {
            return Err(KvError::WrongType { key: key.to_owned() });
        }
        return Err(KvError::Backend(message.to_owned()));
    }
    if !(200..300).contains(&status) {
        return Err(KvError::Backend(format!("status {status}")));
    }
    json.get("result")
        .cloned()
        .ok_or_else(|| KvError::Protocol("missing result field".into()))
}

pub(crate) fn as_opt_string(value: Value) -> Result<Option<String>, KvError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(KvError::Protocol(format!("expected string, got {other}"))),
    }
}

/// Decode a conditional `SET ... NX` reply: `"OK"` when written, null when
/// the key already existed.
pub(crate) fn as_set_outcome(value: &Value) -> Result<bool, KvError> {
    match value {
        Value::Null => Ok(false),
        Value::String(s) if s == "OK" => Ok(true),
        other => Err(KvError::Protocol(format!("expected OK or null, got {other}"))),
    }
}

pub(crate) fn as_int(value: &Value) -> Result<i64, KvError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| KvError::Protocol(format!("expected integer, got {n}"))),
        Value::String(s) => s
            .parse()
            .map_err(|_| KvError::Protocol(format!("expected integer, got {s:?}"))),
        other => Err(KvError::Protocol(format!("expected integer, got {other}"))),
    }
}

pub(crate) fn as_string_list(value: Value) -> Result<Vec<String>, KvError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(KvError::Protocol(format!("expected string element, got {other}"))),
            })
            .collect(),
        other => Err(KvError::Protocol(format!("expected array, got {other}"))),
    }
}

/// Decode an `HGETALL` reply: a flat `[field, value, field, value, ...]` list.
pub(crate) fn as_int_hash(value: Value) -> Result<HashMap<String, i64>, KvError> {
    let flat = as_string_list(value)?;
    let mut out = HashMap::with_capacity(flat.len() / 2);
    for pair in flat.chunks(2) {
        let [field, raw] = pair else {
            return Err(KvError::Protocol("odd-length hash reply".into()));
        };
        // Non-numeric fields are not ours; skip rather than fail the whole read.
        if let Ok(n) = raw.parse::<i64>() {
            out.insert(field.clone(), n);
        }
    }
    Ok(out)
}

/// Decode a `SCAN` reply: `[next_cursor, [keys...]]`.
pub(crate) fn as_scan_page(value: Value) -> Result<(String, Vec<String>), KvError> {
    let Value::Array(mut parts) = value else {
        return Err(KvError::Protocol("expected scan reply array".into()));
    };
    if parts.len() != 2 {
        return Err(KvError::Protocol(format!("scan reply has {} parts", parts.len())));
    }
    let keys = as_string_list(parts.pop().unwrap_or(Value::Null))?;
    let cursor = match parts.pop() {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        other => return Err(KvError::Protocol(format!("bad scan cursor: {other:?}"))),
    };
    Ok((cursor, keys))
}

/// Escape glob metacharacters so a literal prefix can be used in `MATCH`.
pub(crate) fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

// =============================================================================
// STORE IMPL
// =============================================================================

#[async_trait::async_trait]
impl KvStore for UpstashStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        as_opt_string(self.command(&["GET", key]).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.command(&["SET", key, value]).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let secs = ttl.as_secs().max(1).to_string();
        as_set_outcome(&self.command(&["SET", key, value, "NX", "EX", &secs]).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let removed = as_int(&self.command(&["DEL", key]).await?)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let count = as_int(&self.command(&["EXISTS", key]).await?)?;
        Ok(count > 0)
    }

    async fn members_of(&self, set_key: &str) -> Result<Vec<String>, KvError> {
        as_string_list(self.command(&["SMEMBERS", set_key]).await?)
    }

    async fn add_member(&self, set_key: &str, member: &str) -> Result<(), KvError> {
        self.command(&["SADD", set_key, member]).await?;
        Ok(())
    }

    async fn remove_member(&self, set_key: &str, member: &str) -> Result<(), KvError> {
        self.command(&["SREM", set_key, member]).await?;
        Ok(())
    }

    async fn type_of(&self, key: &str) -> Result<KeyType, KvError> {
        let raw = as_opt_string(self.command(&["TYPE", key]).await?)?;
        Ok(raw.map_or(KeyType::None, |t| KeyType::parse(&t)))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let pattern = format!("{}*", glob_escape(prefix));
        let mut cursor = "0".to_owned();
        let mut keys = Vec::new();
        loop {
            let reply = self
                .command(&["SCAN", &cursor, "MATCH", &pattern, "COUNT", SCAN_COUNT])
                .await?;
            let (next, page) = as_scan_page(reply)?;
            keys.extend(page);
            if next == "0" {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn incr_field(&self, key: &str, field: &str, by: i64) -> Result<i64, KvError> {
        let by = by.to_string();
        as_int(&self.command(&["HINCRBY", key, field, &by]).await?)
    }

    async fn fields_of(&self, key: &str) -> Result<HashMap<String, i64>, KvError> {
        as_int_hash(self.command(&["HGETALL", key]).await?)
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: Option<&str>) -> Result<bool, KvError> {
        let (delete_flag, value) = match new {
            Some(v) => ("0", v),
            None => ("1", ""),
        };
        let reply = self
            .command(&["EVAL", COMPARE_AND_SWAP_SCRIPT, "1", key, expected, delete_flag, value])
            .await?;
        Ok(as_int(&reply)? == 1)
    }
}

#[cfg(test)]
#[path = "upstash_test.rs"]
mod tests;
