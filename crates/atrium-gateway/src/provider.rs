use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use atrium_llm::{ChatMessage, CompletionStreamer, LlmClient, StreamEvent};
use atrium_rag::{Embedder, EmbeddingClient};
use atrium_vault::{KeyVault, Provider};

/// Resolves the provider credential per call so vault rotations take effect
/// without a restart: the default active vault key wins, then the bootstrap
/// key from config.
pub struct ProviderHandle {
    vault: Arc<KeyVault>,
    bootstrap_key: Option<String>,
    base_url: String,
    embedding_model: String,
}

impl ProviderHandle {
    pub fn new(
        vault: Arc<KeyVault>,
        bootstrap_key: Option<String>,
        base_url: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            vault,
            bootstrap_key,
            base_url: base_url.into(),
            embedding_model: embedding_model.into(),
        }
    }

    fn active_key(&self) -> String {
        self.vault
            .get_active(Provider::OpenRouter)
            .ok()
            .or_else(|| self.bootstrap_key.clone())
            .unwrap_or_default()
    }

    /// A chat client bound to the currently active credential.
    pub fn client(&self) -> LlmClient {
        LlmClient::new(self.active_key(), &self.base_url)
    }

    fn embedding_client(&self) -> EmbeddingClient {
        EmbeddingClient::new(self.active_key(), &self.base_url, &self.embedding_model)
    }
}

#[async_trait]
impl CompletionStreamer for ProviderHandle {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
        max_tokens: u32,
        tx: mpsc::Sender<StreamEvent>,
    ) -> atrium_llm::error::Result<()> {
        self.client()
            .stream_chat(messages, model, temperature, max_tokens, tx)
            .await
    }
}

#[async_trait]
impl Embedder for ProviderHandle {
    async fn embed(&self, texts: &[String]) -> atrium_rag::error::Result<Vec<Vec<f32>>> {
        self.embedding_client().embed(texts).await
    }
}

/// Boxable shared view of the handle for consumers that own a
/// `Box<dyn Embedder>`.
pub struct SharedEmbedder(pub Arc<ProviderHandle>);

#[async_trait]
impl Embedder for SharedEmbedder {
    async fn embed(&self, texts: &[String]) -> atrium_rag::error::Result<Vec<Vec<f32>>> {
        self.0.embed(texts).await
    }
}
