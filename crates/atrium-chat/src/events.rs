use serde::Serialize;

use atrium_core::TokenUsage;

/// Wire events for one chat turn, emitted in protocol order. Nothing follows
/// `Done` or `Error`.
///
/// Serializes to the SSE JSON bodies:
/// `{"type":"user_message","message_id":...}` and so on.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    UserMessage {
        message_id: String,
    },
    AssistantMessageStart {
        message_id: String,
    },
    Content {
        content: String,
    },
    Done {
        message_id: String,
        tokens_used: TokenUsage,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        quota_exceeded: Option<bool>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shapes_match_protocol() {
        let json = serde_json::to_value(ChatEvent::UserMessage {
            message_id: "m-1".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "user_message", "message_id": "m-1"}));

        let json = serde_json::to_value(ChatEvent::Done {
            message_id: "m-2".to_string(),
            tokens_used: TokenUsage::new(3, 4),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "done",
                "message_id": "m-2",
                "tokens_used": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
            })
        );

        // quota_exceeded is omitted unless set.
        let json = serde_json::to_value(ChatEvent::Error {
            error: "boom".to_string(),
            quota_exceeded: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "error": "boom"}));
    }
}
