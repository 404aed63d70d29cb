use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{RagError, Result};

/// One request per batch of this many texts.
const BATCH_SIZE: usize = 100;
const BATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Text-to-vector interface. The production impl calls the provider API;
/// tests substitute a deterministic fake.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, preserving input order. No internal retry: the caller
    /// decides whether a failure is worth another attempt.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embedding client for an OpenRouter-compatible `/embeddings` endpoint.
pub struct EmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .timeout(BATCH_TIMEOUT)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RagError::Embedding { status, message });
        }

        let body: EmbeddingResponse = resp.json().await?;

        // The provider may return items out of order; realign by index so
        // output position i always corresponds to input text i.
        let mut data = body.data;
        data.sort_by_key(|item| item.index);

        if data.len() != texts.len() {
            return Err(RagError::CountMismatch {
                sent: texts.len(),
                received: data.len(),
            });
        }

        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.api_key.is_empty() {
            return Err(RagError::MissingApiKey);
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            debug!(batch_len = batch.len(), "embedding batch");
            all.extend(self.embed_batch(batch).await?);
        }
        Ok(all)
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}
