use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use atrium_llm::{ChatMessage, CompletionStreamer, LlmClient, PricingCache, Role, StreamEvent};
use atrium_quota::QuotaService;
use atrium_rag::RagComposer;

use crate::assistants::AssistantStore;
use crate::conversations::ConversationStore;
use crate::error::Result;
use crate::events::ChatEvent;
use crate::types::{MessageRole, DEFAULT_CONVERSATION_TITLE};

/// Length of the auto-generated conversation title.
const TITLE_MAX_CHARS: usize = 50;
/// Backpressure bound between the upstream reader and the event forwarder.
const STREAM_BUFFER: usize = 32;

/// Drives one chat turn end to end: admission, persistence, prompt assembly,
/// upstream streaming, and usage accounting.
pub struct ChatOrchestrator {
    conversations: Arc<ConversationStore>,
    assistants: Arc<AssistantStore>,
    composer: Arc<RagComposer>,
    streamer: Arc<dyn CompletionStreamer>,
    quota: Arc<QuotaService>,
    llm: Arc<LlmClient>,
    pricing: Arc<PricingCache>,
}

impl ChatOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversations: Arc<ConversationStore>,
        assistants: Arc<AssistantStore>,
        composer: Arc<RagComposer>,
        streamer: Arc<dyn CompletionStreamer>,
        quota: Arc<QuotaService>,
        llm: Arc<LlmClient>,
        pricing: Arc<PricingCache>,
    ) -> Self {
        Self {
            conversations,
            assistants,
            composer,
            streamer,
            quota,
            llm,
            pricing,
        }
    }

    /// Run the per-turn protocol, emitting [`ChatEvent`]s into `tx`.
    ///
    /// Pre-stream failures (unknown or unowned conversation) return `Err` so
    /// the gateway can answer 404 before the stream opens. Everything after
    /// that is reported as events; no event follows `Done` or `Error`.
    ///
    /// Dropping the receiver cancels the upstream call; the partial
    /// assistant row keeps whatever content had accumulated.
    #[instrument(skip(self, content, tx))]
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        model_override: Option<&str>,
        caller_user_id: Option<&str>,
        is_admin: bool,
        tx: mpsc::Sender<ChatEvent>,
    ) -> Result<()> {
        let conversation = self
            .conversations
            .get_for(conversation_id, caller_user_id, is_admin)?;

        let assistant = match conversation
            .assistant_id
            .as_deref()
            .and_then(|id| self.assistants.get(id, false).ok())
        {
            Some(a) => a,
            None => {
                let _ = tx
                    .send(ChatEvent::Error {
                        error: "Assistant not found for this conversation".to_string(),
                        quota_exceeded: None,
                    })
                    .await;
                return Ok(());
            }
        };

        // Admission. A broken quota check logs and admits rather than
        // blocking chat on accounting infrastructure.
        match self.quota.check(caller_user_id) {
            Ok(check) if !check.allowed => {
                let reason = check.reason.unwrap_or_else(|| "limit exceeded".to_string());
                let _ = tx
                    .send(ChatEvent::Error {
                        error: format!("Usage limit exceeded: {reason}"),
                        quota_exceeded: Some(true),
                    })
                    .await;
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "quota check failed; admitting turn"),
        }

        let user_message =
            self.conversations
                .add_message(conversation_id, MessageRole::User, content, None)?;
        if tx
            .send(ChatEvent::UserMessage {
                message_id: user_message.id.clone(),
            })
            .await
            .is_err()
        {
            return Ok(());
        }

        // RAG compose; a retrieval outage degrades to the plain persona
        // prompt rather than failing the turn.
        let system_prompt = match self
            .composer
            .augmented_prompt(
                &assistant.id,
                &assistant.name,
                &assistant.instructions,
                content,
                assistant.max_retrieval_chunks as usize,
                assistant.max_context_tokens as usize,
            )
            .await
        {
            Ok((prompt, _chunks)) => prompt,
            Err(e) => {
                warn!(error = %e, "rag compose failed; using plain prompt");
                RagComposer::build_system_prompt(&assistant.name, &assistant.instructions, "")
            }
        };

        let mut messages_for_api = vec![ChatMessage {
            role: Role::System,
            content: system_prompt,
        }];
        for msg in self.conversations.list_messages(conversation_id)? {
            if msg.id == user_message.id {
                continue;
            }
            messages_for_api.push(ChatMessage {
                role: match msg.role {
                    MessageRole::System => Role::System,
                    MessageRole::User => Role::User,
                    MessageRole::Assistant => Role::Assistant,
                },
                content: msg.content,
            });
        }
        messages_for_api.push(ChatMessage {
            role: Role::User,
            content: content.to_string(),
        });

        let model = model_override.unwrap_or(&assistant.model).to_string();

        // Reserve the assistant row before streaming so its id is stable for
        // every later frame.
        let reserved = self.conversations.add_message(
            conversation_id,
            MessageRole::Assistant,
            "",
            Some(&model),
        )?;
        if tx
            .send(ChatEvent::AssistantMessageStart {
                message_id: reserved.id.clone(),
            })
            .await
            .is_err()
        {
            return Ok(());
        }

        // Upstream streaming runs in its own task; setup failures surface as
        // a terminal error event through the same channel.
        let (stream_tx, mut stream_rx) = mpsc::channel::<StreamEvent>(STREAM_BUFFER);
        {
            let streamer = self.streamer.clone();
            let messages = messages_for_api;
            let model = model.clone();
            let temperature = assistant.temperature;
            let max_tokens = assistant.max_tokens;
            tokio::spawn(async move {
                let err_tx = stream_tx.clone();
                if let Err(e) = streamer
                    .stream(&messages, &model, temperature, max_tokens, stream_tx)
                    .await
                {
                    let _ = err_tx
                        .send(StreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            });
        }

        let mut accumulated = String::new();
        while let Some(event) = stream_rx.recv().await {
            match event {
                StreamEvent::Content { text } => {
                    accumulated.push_str(&text);
                    if tx.send(ChatEvent::Content { content: text }).await.is_err() {
                        // Client disconnected: cancel upstream by dropping the
                        // receiver; keep the partial row for auditability.
                        self.conversations
                            .set_message_content(&reserved.id, &accumulated)?;
                        return Ok(());
                    }
                }
                StreamEvent::Done { content, usage } => {
                    self.conversations
                        .finalize_message(&reserved.id, &content, usage)?;

                    if usage.total_tokens > 0 {
                        if let Err(e) = self
                            .quota
                            .log_usage(
                                &self.llm,
                                &self.pricing,
                                Some(&assistant.id),
                                Some(conversation_id),
                                Some(&reserved.id),
                                &model,
                                usage,
                            )
                            .await
                        {
                            warn!(error = %e, "usage logging failed");
                        }
                    }

                    // Auto-title from the first user message once a reply
                    // exists.
                    if conversation.title == DEFAULT_CONVERSATION_TITLE && !content.is_empty() {
                        let title = truncate_title(&user_message.content);
                        if !title.is_empty() {
                            self.conversations.update_title(&conversation.id, &title)?;
                        }
                    }

                    let _ = tx
                        .send(ChatEvent::Done {
                            message_id: reserved.id.clone(),
                            tokens_used: usage,
                        })
                        .await;
                    info!(
                        message_id = %reserved.id,
                        total_tokens = usage.total_tokens,
                        "chat turn complete"
                    );
                    return Ok(());
                }
                StreamEvent::Error { message } => {
                    // Keep the partially filled row.
                    self.conversations
                        .set_message_content(&reserved.id, &accumulated)?;
                    let _ = tx
                        .send(ChatEvent::Error {
                            error: message,
                            quota_exceeded: None,
                        })
                        .await;
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

/// First 50 characters of the user message, with an ellipsis when truncated.
fn truncate_title(user_content: &str) -> String {
    let trimmed = user_content.trim();
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title = format!("{}...", title.trim());
    }
    title.trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rusqlite::Connection;

    use atrium_core::TokenUsage;
    use atrium_llm::LlmError;
    use atrium_quota::types::QuotaUpdate;
    use atrium_rag::{Embedder, VectorStore};

    use super::*;
    use crate::types::AssistantParams;

    /// Replays a fixed event script, ignoring the request.
    struct ScriptedStreamer {
        events: Vec<StreamEvent>,
    }

    #[async_trait]
    impl CompletionStreamer for ScriptedStreamer {
        async fn stream(
            &self,
            _messages: &[ChatMessage],
            _model: &str,
            _temperature: f64,
            _max_tokens: u32,
            tx: mpsc::Sender<StreamEvent>,
        ) -> atrium_llm::error::Result<()> {
            for event in self.events.clone() {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    /// Fails before producing any frame, like a non-2xx upstream response.
    struct RefusingStreamer;

    #[async_trait]
    impl CompletionStreamer for RefusingStreamer {
        async fn stream(
            &self,
            _messages: &[ChatMessage],
            _model: &str,
            _temperature: f64,
            _max_tokens: u32,
            _tx: mpsc::Sender<StreamEvent>,
        ) -> atrium_llm::error::Result<()> {
            Err(LlmError::Api {
                status: 503,
                message: "provider down".to_string(),
            })
        }
    }

    struct NullEmbedder;

    #[async_trait]
    impl Embedder for NullEmbedder {
        async fn embed(&self, texts: &[String]) -> atrium_rag::error::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0]).collect())
        }
    }

    struct Fixture {
        orchestrator: ChatOrchestrator,
        conversations: Arc<ConversationStore>,
        quota: Arc<QuotaService>,
        conversation_id: String,
    }

    fn fixture(streamer: Arc<dyn CompletionStreamer>, owner: Option<&str>) -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        atrium_quota::db::init_db(&conn).unwrap();
        atrium_rag::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));

        let conversations = Arc::new(ConversationStore::new(db.clone()));
        let assistants = Arc::new(AssistantStore::new(db.clone()));
        let quota = Arc::new(QuotaService::new(db.clone()));
        quota.get_or_create_global_quota().unwrap();

        let assistant = assistants
            .create(&AssistantParams {
                name: "Atlas".to_string(),
                description: String::new(),
                instructions: "You are helpful.".to_string(),
                model: "anthropic/claude-3.5-sonnet".to_string(),
                temperature: 0.7,
                max_tokens: 2048,
                max_retrieval_chunks: 5,
                max_context_tokens: 4000,
                avatar_url: None,
                workspace_id: None,
            })
            .unwrap();
        let conversation = conversations
            .create(&assistant.id, None, owner, None)
            .unwrap();

        let composer = Arc::new(RagComposer::new(
            Box::new(NullEmbedder),
            VectorStore::new(db),
        ));
        // Empty key: pricing lookups fail closed to zero cost, no network.
        let llm = Arc::new(LlmClient::new("", "http://127.0.0.1:0"));
        let pricing = Arc::new(PricingCache::new());

        Fixture {
            orchestrator: ChatOrchestrator::new(
                conversations.clone(),
                assistants,
                composer,
                streamer,
                quota.clone(),
                llm,
                pricing,
            ),
            conversations,
            quota,
            conversation_id: conversation.id,
        }
    }

    async fn collect(fx: &Fixture, content: &str, user: Option<&str>, admin: bool) -> Vec<ChatEvent> {
        let (tx, mut rx) = mpsc::channel(256);
        fx.orchestrator
            .send_message(&fx.conversation_id, content, None, user, admin, tx)
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn happy_chat_emits_protocol_in_order() {
        let streamer = Arc::new(ScriptedStreamer {
            events: vec![
                StreamEvent::Content { text: "Hello".to_string() },
                StreamEvent::Content { text: " there!".to_string() },
                StreamEvent::Done {
                    content: "Hello there!".to_string(),
                    usage: TokenUsage::new(12, 4),
                },
            ],
        });
        let fx = fixture(streamer, Some("u-1"));
        let events = collect(&fx, "Hello", Some("u-1"), false).await;

        assert!(matches!(events[0], ChatEvent::UserMessage { .. }));
        assert!(matches!(events[1], ChatEvent::AssistantMessageStart { .. }));
        let content: String = events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::Content { content } => Some(content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(content, "Hello there!");
        let ChatEvent::Done { message_id, tokens_used } = events.last().unwrap() else {
            panic!("expected terminal done");
        };
        assert_eq!(tokens_used.total_tokens, 16);

        // Both rows persisted; the reserved row is filled in.
        let messages = fx.conversations.list_messages(&fx.conversation_id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].id, *message_id);
        assert_eq!(messages[1].content, "Hello there!");
        assert_eq!(messages[1].tokens_used.unwrap().prompt_tokens, 12);

        // Auto-title from the user message.
        let conv = fx
            .conversations
            .get_for(&fx.conversation_id, Some("u-1"), false)
            .unwrap();
        assert_eq!(conv.title, "Hello");

        // One usage row tagged with the assistant message.
        let usage = fx.quota.current_usage().unwrap();
        assert_eq!(usage.daily_tokens_used, 16);
    }

    #[tokio::test]
    async fn quota_denial_is_a_single_terminal_error() {
        let streamer = Arc::new(ScriptedStreamer { events: vec![] });
        let fx = fixture(streamer, Some("u-1"));
        fx.quota
            .update_global_quota(&QuotaUpdate {
                daily_cost_limit_usd: Some(0.01),
                ..Default::default()
            })
            .unwrap();
        fx.quota
            .write_usage(None, None, None, "m", TokenUsage::new(10, 10), 0.02)
            .unwrap();

        let events = collect(&fx, "Hello again", Some("u-1"), false).await;
        assert_eq!(events.len(), 1);
        let ChatEvent::Error { error, quota_exceeded } = &events[0] else {
            panic!("expected quota error");
        };
        assert_eq!(*quota_exceeded, Some(true));
        assert!(error.contains("Daily cost limit"));

        // No messages were persisted.
        assert!(fx.conversations.list_messages(&fx.conversation_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn ownership_mismatch_errors_before_streaming() {
        let streamer = Arc::new(ScriptedStreamer { events: vec![] });
        let fx = fixture(streamer, Some("u-owner"));

        let (tx, _rx) = mpsc::channel(8);
        let err = fx
            .orchestrator
            .send_message(&fx.conversation_id, "hi", None, Some("u-intruder"), false, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::ChatError::ConversationNotFound { .. }));

        // Admin passes the same check.
        let (tx, _rx) = mpsc::channel(8);
        assert!(fx
            .orchestrator
            .send_message(&fx.conversation_id, "hi", None, Some("u-intruder"), true, tx)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn upstream_refusal_keeps_partial_row_and_errors() {
        let fx = fixture(Arc::new(RefusingStreamer), Some("u-1"));
        let events = collect(&fx, "Hello", Some("u-1"), false).await;

        let ChatEvent::Error { error, quota_exceeded } = events.last().unwrap() else {
            panic!("expected terminal error");
        };
        assert!(error.contains("provider down"));
        assert_eq!(*quota_exceeded, None);

        // The reserved assistant row survives, empty, for auditability.
        let messages = fx.conversations.list_messages(&fx.conversation_id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "");

        // No usage was recorded without a done frame.
        assert_eq!(fx.quota.current_usage().unwrap().daily_tokens_used, 0);
    }

    #[tokio::test]
    async fn title_is_truncated_at_fifty_chars() {
        let streamer = Arc::new(ScriptedStreamer {
            events: vec![StreamEvent::Done {
                content: "ok".to_string(),
                usage: TokenUsage::new(1, 1),
            }],
        });
        let fx = fixture(streamer, Some("u-1"));
        let long = "x".repeat(80);
        collect(&fx, &long, Some("u-1"), false).await;

        let conv = fx
            .conversations
            .get_for(&fx.conversation_id, Some("u-1"), false)
            .unwrap();
        assert_eq!(conv.title, format!("{}...", "x".repeat(50)));
    }
}
