use serde::Serialize;
use tracing::{debug, instrument};

use crate::embedder::Embedder;
use crate::error::Result;
use crate::store::VectorStore;

/// Minimum similarity for a chunk to survive retrieval.
const SIMILARITY_THRESHOLD: f64 = 0.7;
/// Packing budget heuristic: one token is roughly four characters.
const CHARS_PER_TOKEN: usize = 4;

const RAG_PROMPT_TEMPLATE: &str = "You are {assistant_name}.

{assistant_instructions}

Use the following reference materials to inform your response. Only use information from these materials when relevant:

---
{retrieved_chunks}
---

If the reference materials don't contain relevant information, rely on your general knowledge but indicate this to the user.";

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub score: f64,
    pub file_id: String,
    pub chunk_index: i64,
    pub metadata: serde_json::Value,
}

/// Builds RAG-augmented system prompts: embed the query, fetch nearest
/// chunks, score and pack them under the assistant's context budget.
pub struct RagComposer {
    embedder: Box<dyn Embedder>,
    store: VectorStore,
    similarity_threshold: f64,
}

impl RagComposer {
    pub fn new(embedder: Box<dyn Embedder>, store: VectorStore) -> Self {
        Self {
            embedder,
            store,
            similarity_threshold: SIMILARITY_THRESHOLD,
        }
    }

    /// Retrieve the top-k chunks relevant to `query`, filtered by similarity
    /// and sorted descending.
    ///
    /// Raw L2 distance `d` on normalized vectors maps to similarity
    /// `s = 1 - d/2`.
    #[instrument(skip(self, query))]
    pub async fn retrieve(
        &self,
        assistant_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let query_vec = self
            .embedder
            .embed(std::slice::from_ref(&query.to_string()))
            .await?;
        let Some(query_vec) = query_vec.into_iter().next() else {
            return Ok(Vec::new());
        };

        let hits = self.store.query(assistant_id, &query_vec, top_k)?;

        let mut chunks: Vec<RetrievedChunk> = hits
            .into_iter()
            .filter_map(|(text, metadata, distance)| {
                let score = 1.0 - distance / 2.0;
                if score < self.similarity_threshold {
                    return None;
                }
                Some(RetrievedChunk {
                    text,
                    score,
                    file_id: metadata
                        .get("file_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    chunk_index: metadata
                        .get("chunk_index")
                        .and_then(|v| v.as_i64())
                        .unwrap_or_default(),
                    metadata,
                })
            })
            .collect();

        chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        debug!(survivors = chunks.len(), "retrieval complete");
        Ok(chunks)
    }

    /// Greedily pack chunks (already sorted by relevance) until the next one
    /// would exceed the character budget of `max_tokens`. Each chunk is
    /// prefixed with a `[Source N]` marker.
    pub fn format_context(chunks: &[RetrievedChunk], max_tokens: usize) -> String {
        if chunks.is_empty() {
            return String::new();
        }

        let max_chars = max_tokens * CHARS_PER_TOKEN;
        let mut parts: Vec<String> = Vec::new();
        let mut total_chars = 0usize;

        for (i, chunk) in chunks.iter().enumerate() {
            let part = format!("[Source {}]\n{}", i + 1, chunk.text);
            if total_chars + part.len() > max_chars {
                break;
            }
            total_chars += part.len() + 2;
            parts.push(part);
        }

        parts.join("\n\n")
    }

    /// System prompt with the context section, or the plain persona prompt
    /// when no context survived.
    pub fn build_system_prompt(assistant_name: &str, instructions: &str, context: &str) -> String {
        if context.is_empty() {
            return format!("You are {assistant_name}.\n\n{instructions}");
        }
        RAG_PROMPT_TEMPLATE
            .replace("{assistant_name}", assistant_name)
            .replace("{assistant_instructions}", instructions)
            .replace("{retrieved_chunks}", context)
    }

    /// Full composition: retrieve, pack, and render the system prompt.
    /// Returns the prompt alongside the chunks that informed it.
    pub async fn augmented_prompt(
        &self,
        assistant_id: &str,
        assistant_name: &str,
        instructions: &str,
        user_query: &str,
        top_k: usize,
        max_context_tokens: usize,
    ) -> Result<(String, Vec<RetrievedChunk>)> {
        let chunks = self.retrieve(assistant_id, user_query, top_k).await?;
        let context = Self::format_context(&chunks, max_context_tokens);
        let prompt = Self::build_system_prompt(assistant_name, instructions, &context);
        Ok((prompt, chunks))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use rusqlite::Connection;

    use super::*;

    /// Embeds every text to a fixed unit vector; queries land exactly on
    /// stored chunks so distances are deterministic.
    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    fn store() -> VectorStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        VectorStore::new(Arc::new(Mutex::new(conn)))
    }

    fn chunk(text: &str, score: f64) -> RetrievedChunk {
        RetrievedChunk {
            text: text.to_string(),
            score,
            file_id: "f-1".to_string(),
            chunk_index: 0,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn retrieval_filters_by_similarity_and_sorts() {
        let store = store();
        // Distance 0 from the query vector => similarity 1.0 (kept);
        // distance 2 (opposite unit vector) => similarity 0.0 (dropped).
        store
            .upsert(
                "a-1",
                "f-1",
                &["near".to_string(), "far".to_string()],
                &[vec![1.0, 0.0], vec![-1.0, 0.0]],
                &[serde_json::json!({}), serde_json::json!({})],
            )
            .unwrap();

        let composer = RagComposer::new(Box::new(FixedEmbedder(vec![1.0, 0.0])), store);
        let chunks = composer.retrieve("a-1", "query", 5).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "near");
        assert!((chunks[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_collection_yields_plain_prompt() {
        let composer = RagComposer::new(Box::new(FixedEmbedder(vec![1.0])), store());
        let (prompt, chunks) = composer
            .augmented_prompt("a-1", "Atlas", "Answer briefly.", "hello", 5, 4000)
            .await
            .unwrap();
        assert!(chunks.is_empty());
        assert_eq!(prompt, "You are Atlas.\n\nAnswer briefly.");
    }

    #[test]
    fn packing_respects_character_budget() {
        let chunks = vec![chunk(&"x".repeat(100), 0.9), chunk(&"y".repeat(100), 0.8)];
        // Budget of 30 tokens = 120 chars: only the first chunk fits once the
        // source prefix is counted.
        let context = RagComposer::format_context(&chunks, 30);
        assert!(context.contains("[Source 1]"));
        assert!(!context.contains("[Source 2]"));
    }

    #[test]
    fn context_prompt_embeds_sources() {
        let context = RagComposer::format_context(&[chunk("fact one", 0.9)], 4000);
        let prompt = RagComposer::build_system_prompt("Atlas", "Be helpful.", &context);
        assert!(prompt.contains("You are Atlas."));
        assert!(prompt.contains("[Source 1]\nfact one"));
        assert!(prompt.contains("reference materials"));
    }
}
