use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use opsmate_config::LlmConfig;

// ── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ── Client seam ──────────────────────────────────────────────────────────────

/// Text-generation collaborator used by the router, formatter and summarizer.
///
/// Implementations return the raw assistant text; an `Err` means no usable
/// reply was produced (transport failure, non-2xx, missing content).
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
            model: config.ollama_model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

/// Request body for Ollama's non-streaming `/api/chat`.
pub fn chat_payload(model: &str, messages: &[ChatMessage], temperature: f32) -> serde_json::Value {
    json!({
        "model": model,
        "messages": messages,
        "stream": false,
        "options": { "temperature": temperature },
    })
}

/// Pull `message.content` out of an `/api/chat` response body.
pub fn parse_chat_response(body: &serde_json::Value) -> Option<String> {
    body.get("message")
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(ToString::to_string)
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let payload = chat_payload(&self.model, messages, temperature);
        let response = match self.client.post(self.endpoint()).json(&payload).send().await {
            Ok(response) => response,
            Err(error) if error.is_connect() => bail!(
                "Cannot connect to Ollama. Make sure Ollama is running at {} and the model '{}' is pulled.",
                self.base_url,
                self.model
            ),
            Err(error) if error.is_timeout() => bail!("Ollama request timed out: {error}"),
            Err(error) => bail!("Ollama error: {error}"),
        };

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            bail!("Ollama error ({status}): {body}");
        }

        match parse_chat_response(&body) {
            Some(content) => {
                debug!(model = %self.model, chars = content.len(), "ollama reply");
                Ok(content)
            }
            None => bail!("Ollama response missing text: {body}"),
        }
    }
}

// ── Structured output extraction ──────────────────────────────────────────────

/// Parse an LLM reply that is supposed to be a single JSON object.
///
/// Strategy 1: the whole (trimmed) reply.  Strategy 2: the first
/// brace-balanced `{...}` span, ignoring braces inside JSON strings.
/// Returns `None` when neither parses as `T`.
///
/// ```rust
/// use opsmate_llm::extract_json_output;
///
/// let raw = "Sure! {\"action\":\"get_uptime\"} hope that helps";
/// let value: serde_json::Value = extract_json_output(raw).unwrap();
/// assert_eq!(value["action"], "get_uptime");
/// ```
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let candidate = first_brace_span(trimmed)?;
    serde_json::from_str(candidate).ok()
}

/// The first `{ ... }` span whose braces balance.
fn first_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Tests ────────────────────────────────────────────────────────────────────
