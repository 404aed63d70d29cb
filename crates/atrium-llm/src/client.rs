use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use atrium_core::TokenUsage;

use crate::error::{LlmError, Result};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(30);
const STREAM_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Models surfaced first in the model list.
const FEATURED_MODELS: &[&str] = &[
    "anthropic/claude-3.5-sonnet",
    "anthropic/claude-3-opus",
    "anthropic/claude-3-haiku",
    "openai/gpt-4-turbo",
    "openai/gpt-4o",
    "openai/gpt-4o-mini",
    "google/gemini-pro-1.5",
    "meta-llama/llama-3.1-70b-instruct",
    "mistralai/mistral-large",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry from the provider's model catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub context_length: u32,
    /// USD per 1M tokens.
    pub pricing_prompt: f64,
    /// USD per 1M tokens.
    pub pricing_completion: f64,
}

/// Client for an OpenRouter-compatible chat API.
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// List available chat models, featured models first.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let resp = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(LIST_MODELS_TIMEOUT)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, "model list request failed");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let catalogue: ModelCatalogue = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let mut models: Vec<ModelInfo> = catalogue
            .data
            .into_iter()
            .map(|m| {
                let name = m.name.unwrap_or_else(|| m.id.clone());
                ModelInfo {
                    name,
                    description: m.description,
                    context_length: m.context_length.unwrap_or(4096),
                    pricing_prompt: m
                        .pricing
                        .as_ref()
                        .and_then(|p| p.prompt.parse().ok())
                        .unwrap_or(0.0),
                    pricing_completion: m
                        .pricing
                        .as_ref()
                        .and_then(|p| p.completion.parse().ok())
                        .unwrap_or(0.0),
                    id: m.id,
                }
            })
            .collect();

        models.sort_by_key(|m| {
            let featured_index = FEATURED_MODELS
                .iter()
                .position(|f| *f == m.id)
                .unwrap_or(FEATURED_MODELS.len());
            (featured_index, m.id.clone())
        });

        Ok(models)
    }

    /// Stream a chat completion, emitting [`StreamEvent`]s into `tx`.
    ///
    /// Setup failures (missing key, transport error, non-2xx) return `Err`;
    /// mid-stream failures are emitted as a terminal `Error` event. Dropping
    /// the receiver cancels the upstream read promptly.
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
        max_tokens: u32,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": true,
        });

        debug!(%model, messages = messages.len(), "sending streaming request");

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .timeout(STREAM_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "streaming completion request failed");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        process_completion_stream(resp, tx).await;
        Ok(())
    }

    /// Cheap reachability check against the models endpoint.
    /// Returns (is_connected, latency_ms, error_message).
    pub async fn check_connectivity(&self) -> (bool, Option<u64>, Option<String>) {
        if self.api_key.is_empty() {
            return (false, None, Some("API key not configured".to_string()));
        }

        let started = Instant::now();
        let resp = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(CONNECTIVITY_TIMEOUT)
            .send()
            .await;

        match resp {
            Ok(r) => {
                let latency = started.elapsed().as_millis() as u64;
                match r.status().as_u16() {
                    200 => (true, Some(latency), None),
                    401 => (false, Some(latency), Some("Invalid API key".to_string())),
                    other => (false, Some(latency), Some(format!("HTTP {other}"))),
                }
            }
            Err(e) if e.is_timeout() => (false, None, Some("Connection timeout".to_string())),
            Err(e) => (false, None, Some(e.to_string())),
        }
    }
}

/// Streaming seam between the chat orchestrator and the provider client.
/// Tests substitute a scripted implementation.
#[async_trait]
pub trait CompletionStreamer: Send + Sync {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
        max_tokens: u32,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()>;
}

#[async_trait]
impl CompletionStreamer for LlmClient {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
        max_tokens: u32,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        self.stream_chat(messages, model, temperature, max_tokens, tx)
            .await
    }
}

/// Parse the SSE byte stream, emitting `Content` per delta and a final `Done`
/// carrying the accumulated text and whatever usage the provider reported
/// (which may arrive only on the last frame). Malformed frames are skipped.
async fn process_completion_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    use futures_util::StreamExt;

    let mut accumulated = String::new();
    let mut prompt_tokens: u32 = 0;
    let mut completion_tokens: u32 = 0;
    let mut line_buf = String::new();

    let mut byte_stream = resp.bytes_stream();

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        // SSE frames arrive split across chunks; keep the incomplete last
        // line buffered until its newline shows up.
        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(SseParsed::Data(data)) = parse_sse_line(line) {
                if data.trim() == "[DONE]" {
                    break 'outer;
                }

                let frame: CompletionChunk = match serde_json::from_str(&data) {
                    Ok(f) => f,
                    Err(_) => continue, // skip malformed frames
                };

                if let Some(usage) = &frame.usage {
                    prompt_tokens = usage.prompt_tokens;
                    completion_tokens = usage.completion_tokens;
                }

                for choice in &frame.choices {
                    if let Some(content) = &choice.delta.content {
                        if !content.is_empty() {
                            accumulated.push_str(content);
                            if tx
                                .send(StreamEvent::Content {
                                    text: content.clone(),
                                })
                                .await
                                .is_err()
                            {
                                return; // receiver dropped — cancel upstream
                            }
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    info!(
        chars = accumulated.len(),
        prompt_tokens, completion_tokens, "completion stream finished"
    );

    let _ = tx
        .send(StreamEvent::Done {
            content: accumulated,
            usage: TokenUsage::new(prompt_tokens, completion_tokens),
        })
        .await;
}

// Provider response types (deserialization only)

#[derive(Deserialize)]
struct ModelCatalogue {
    data: Vec<CatalogueEntry>,
}

#[derive(Deserialize)]
struct CatalogueEntry {
    id: String,
    name: Option<String>,
    description: Option<String>,
    context_length: Option<u32>,
    pricing: Option<CataloguePricing>,
}

/// Prices arrive as decimal strings, USD per 1M tokens.
#[derive(Deserialize)]
struct CataloguePricing {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    completion: String,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ChunkUsage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_frame_parses() {
        let frame: CompletionChunk = serde_json::from_str(
            r#"{"id":"gen-1","choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(frame.choices[0].delta.content.as_deref(), Some("Hel"));
        assert!(frame.usage.is_none());
    }

    #[test]
    fn usage_only_frame_parses() {
        // Some providers attach usage to a trailing frame with no choices.
        let frame: CompletionChunk = serde_json::from_str(
            r#"{"id":"gen-1","choices":[],"usage":{"prompt_tokens":12,"completion_tokens":4,"total_tokens":16}}"#,
        )
        .unwrap();
        assert!(frame.choices.is_empty());
        let usage = frame.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 4);
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage {
            role: Role::Assistant,
            content: "hi".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
