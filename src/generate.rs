//! Monologue generation backend.
//!
//! DESIGN
//! ======
//! Routes talk to a [`MonologueWriter`] trait object so the HTTP surface can
//! be exercised without a model. [`OpenAiWriter`] is the production
//! implementation against the `OpenAI` `/responses` endpoint.
//!
//! Streaming reads the same endpoint with `stream: true` and forwards each
//! `response.output_text.delta` fragment as it arrives.

use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::ErrorCode;
use crate::services::metrics::GenerationMeta;

const REQUEST_TIMEOUT_SECS: u64 = 120;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const MAX_OUTPUT_TOKENS: u32 = 900;
const MAX_TITLE_CHARS: usize = 120;
const FALLBACK_TITLE: &str = "Monologue";

const INSTRUCTIONS: &str =
    "You are a produced playwright writing ORIGINAL, family-safe, performable monologues. Output plain text only.";

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("generation backend is not configured")]
    NotConfigured,
    #[error("generation request failed: {0}")]
    Request(String),
    #[error("generation backend returned status {status}")]
    Response { status: u16, body: String },
    #[error("generation response parse failed: {0}")]
    Parse(String),
    #[error("No text returned from model.")]
    Empty,
    #[error("generation stream failed: {0}")]
    Stream(String),
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ErrorCode for GenerateError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "E_GENERATION_UNAVAILABLE",
            Self::Request(_) => "E_API_REQUEST",
            Self::Response { .. } => "E_API_RESPONSE",
            Self::Parse(_) => "E_API_PARSE",
            Self::Empty => "E_EMPTY_GENERATION",
            Self::Stream(_) => "E_API_STREAM",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Response { status: 429 | 500..=599, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Monologue {
    pub title: String,
    pub text: String,
}

/// Plain-text fragments in arrival order. An `Err` item ends the stream.
pub type TextStream = BoxStream<'static, Result<String, GenerateError>>;

/// Writes one monologue for the requested attributes.
#[async_trait::async_trait]
pub trait MonologueWriter: Send + Sync {
    async fn write(&self, meta: &GenerationMeta) -> Result<Monologue, GenerateError>;

    /// Stream the monologue as plain text: title, blank line, body. Writers
    /// without native streaming emit the whole piece as one fragment.
    async fn stream(&self, meta: &GenerationMeta) -> Result<TextStream, GenerateError> {
        let monologue = self.write(meta).await?;
        let text = format!("{}\n\n{}", monologue.title, monologue.text);
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }
}

// =============================================================================
// PROMPT
// =============================================================================

/// Target word range for a length label.
pub(crate) fn length_to_range(label: &str) -> (u32, u32) {
    if label.starts_with("Short") {
        (100, 150)
    } else if label.starts_with("Medium") {
        (150, 200)
    } else if label.starts_with("Long") {
        (200, 280)
    } else if label.starts_with("XL") {
        (280, 420)
    } else {
        (160, 220)
    }
}

pub(crate) fn build_prompt(meta: &GenerationMeta) -> String {
    let (min_words, max_words) = length_to_range(&meta.length);
    let style_guide = if meta.level.starts_with("Beginner") {
        "Use simpler vocabulary, shorter sentences, clear beats, gentle stakes."
    } else {
        "Use richer vocabulary, subtext, sharper turns, and denser imagery; still family-safe for the selected age."
    };
    let period_guide = if meta.period.starts_with("Classic") {
        "Lightly heightened, period-appropriate diction; avoid archaic clutter; keep clarity for youth; do NOT imitate existing authors."
    } else {
        "Use present-day, natural speech rhythms."
    };

    format!(
        "Write a brand-new audition monologue for a {age} actor.\n\
         Tone/genre: {genre}. Time period: {period}. {period_guide}\n\
         Family-safe and first-person. Performance level: {level}. {style_guide}\n\
         Target {min_words}-{max_words} words. Output plain text only.\n\
         Format:\n\
         Line 1: a short evocative TITLE\n\
         Blank line\n\
         Then the monologue text.",
        age = meta.age,
        genre = meta.genre,
        period = meta.period,
        level = meta.level,
    )
}

/// Split model output into a title (first non-empty line, markdown markers
/// stripped) and body (the remaining lines). Falls back to the full text when
/// there is no body.
pub(crate) fn split_title_body(text: &str) -> Monologue {
    let mut lines = text.lines().filter(|line| !line.is_empty());
    let first = lines.next().unwrap_or_default();
    let title: String = first
        .trim_start_matches(|c: char| c == '-' || c == '#' || c.is_whitespace())
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    let body = lines.collect::<Vec<_>>().join("\n");
    let body = body.trim();

    Monologue {
        title: if title.is_empty() { FALLBACK_TITLE.to_owned() } else { title },
        text: if body.is_empty() { text.to_owned() } else { body.to_owned() },
    }
}

/// Pull the generated text out of a `/responses` payload.
pub(crate) fn extract_text(root: &Value) -> String {
    if let Some(text) = root
        .get("output_text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return text.to_owned();
    }

    root.get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .find_map(|part| part.get("text").and_then(Value::as_str))
        .map(|text| text.trim().to_owned())
        .unwrap_or_default()
}

// =============================================================================
// STREAM DECODING
// =============================================================================

/// Splits a server-sent-event byte stream into `data:` payloads. Bytes after
/// the last newline stay buffered until the next chunk completes the line.
#[derive(Default)]
pub(crate) struct SseLines {
    buffer: BytesMut,
}

impl SseLines {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            let Ok(line) = std::str::from_utf8(&line) else {
                continue;
            };
            if let Some(data) = line.trim_end().strip_prefix("data:") {
                payloads.push(data.trim_start().to_owned());
            }
        }
        payloads
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StreamEvent {
    Delta(String),
    Done,
    Failed(String),
    Other,
}

/// Classify one `data:` payload from the `/responses` stream.
pub(crate) fn stream_event(payload: &str) -> StreamEvent {
    if payload == "[DONE]" {
        return StreamEvent::Done;
    }
    let Ok(event) = serde_json::from_str::<Value>(payload) else {
        return StreamEvent::Other;
    };
    match event.get("type").and_then(Value::as_str).unwrap_or_default() {
        "response.output_text.delta" => event
            .get("delta")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .map_or(StreamEvent::Other, |d| StreamEvent::Delta(d.to_owned())),
        "response.completed" => StreamEvent::Done,
        "response.failed" | "error" => {
            let message = event
                .pointer("/response/error/message")
                .or_else(|| event.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            StreamEvent::Failed(message.to_owned())
        }
        _ => StreamEvent::Other,
    }
}

// =============================================================================
// OPENAI
// =============================================================================

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

pub struct OpenAiWriter {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiWriter {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: String, model: String, base_url: &str) -> Result<Self, GenerateError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| GenerateError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, api_key, model, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    /// Writer for the configured API key, or `None` when no key is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, GenerateError> {
        let Some(api_key) = config.openai_api_key.clone() else {
            return Ok(None);
        };
        Self::new(api_key, config.openai_model.clone(), &config.openai_base_url).map(Some)
    }

    fn request<'a>(&'a self, prompt: &'a str, stream: bool) -> ResponsesRequest<'a> {
        ResponsesRequest {
            model: &self.model,
            instructions: INSTRUCTIONS,
            input: prompt,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            stream,
        }
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response, GenerateError> {
        let url = format!("{}{}", self.base_url, path);
        self.http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerateError::Request(e.to_string()))
    }

    async fn send_json(&self, path: &str, body: &impl Serialize) -> Result<String, GenerateError> {
        let response = self.post(path, body).await?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| GenerateError::Request(e.to_string()))?;
        if status != 200 {
            return Err(GenerateError::Response { status, body: text });
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl MonologueWriter for OpenAiWriter {
    async fn write(&self, meta: &GenerationMeta) -> Result<Monologue, GenerateError> {
        let prompt = build_prompt(meta);
        let raw = self.send_json("/responses", &self.request(&prompt, false)).await?;
        let root: Value = serde_json::from_str(&raw).map_err(|e| GenerateError::Parse(e.to_string()))?;
        let text = extract_text(&root);
        if text.is_empty() {
            return Err(GenerateError::Empty);
        }
        Ok(split_title_body(&text))
    }

    async fn stream(&self, meta: &GenerationMeta) -> Result<TextStream, GenerateError> {
        let prompt = build_prompt(meta);
        let response = self.post("/responses", &self.request(&prompt, true)).await?;
        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerateError::Response { status, body });
        }

        let mut upstream = response.bytes_stream();
        let fragments = async_stream::stream! {
            let mut lines = SseLines::default();
            while let Some(chunk) = upstream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(GenerateError::Request(e.to_string()));
                        return;
                    }
                };
                for payload in lines.push(&chunk) {
                    match stream_event(&payload) {
                        StreamEvent::Delta(text) => yield Ok(text),
                        StreamEvent::Done => return,
                        StreamEvent::Failed(message) => {
                            yield Err(GenerateError::Stream(message));
                            return;
                        }
                        StreamEvent::Other => {}
                    }
                }
            }
        };
        Ok(fragments.boxed())
    }
}

#[cfg(test)]
#[path = "generate_test.rs"]
mod tests;
