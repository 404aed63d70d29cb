use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use atrium_chat::ChatEvent;
use atrium_core::RequestContext;

use crate::app::AppState;
use crate::auth::{authenticate, require_csrf, Principal};
use crate::error::ApiResult;
use crate::rate_limit::RateCategory;

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    pub assistant_id: String,
    pub title: Option<String>,
    /// Admin-only: create on behalf of another user.
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Deserialize)]
pub struct UpdateConversationRequest {
    pub title: String,
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub model: Option<String>,
}

#[derive(Deserialize)]
pub struct FeedbackRequest {
    pub feedback: String,
    pub reason: Option<String>,
    pub context: Option<String>,
}

fn owner_scope(principal: &Principal) -> (Option<String>, bool) {
    (principal.user_id.clone(), principal.is_admin())
}

/// POST /api/v1/conversations
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    require_csrf(&state, &headers, &method)?;

    // Non-admins always own what they create.
    let owner = if principal.is_admin() {
        req.user_id.or(principal.user_id.clone())
    } else {
        principal.user_id.clone()
    };

    let conversation = state.conversations.create(
        &req.assistant_id,
        req.title.as_deref(),
        owner.as_deref(),
        Some(&state.default_workspace_id),
    )?;
    Ok(Json(serde_json::to_value(conversation)?))
}

/// GET /api/v1/conversations
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    let (user_id, is_admin) = owner_scope(&principal);
    let (conversations, total) = state.conversations.list(
        q.assistant_id.as_deref(),
        user_id.as_deref(),
        is_admin,
        q.limit,
        q.offset,
    )?;
    Ok(Json(serde_json::json!({ "conversations": conversations, "total": total })))
}

/// GET /api/v1/conversations/{id} — conversation plus ordered messages.
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    let (user_id, is_admin) = owner_scope(&principal);
    let conversation = state.conversations.get_for(&id, user_id.as_deref(), is_admin)?;
    let messages = state.conversations.list_messages(&id)?;
    Ok(Json(serde_json::json!({
        "conversation": conversation,
        "messages": messages,
    })))
}

/// PATCH /api/v1/conversations/{id}
pub async fn update_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Path(id): Path<String>,
    Json(req): Json<UpdateConversationRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    require_csrf(&state, &headers, &method)?;
    let (user_id, is_admin) = owner_scope(&principal);
    state.conversations.get_for(&id, user_id.as_deref(), is_admin)?;
    let conversation = state.conversations.update_title(&id, &req.title)?;
    Ok(Json(serde_json::to_value(conversation)?))
}

/// DELETE /api/v1/conversations/{id}
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    require_csrf(&state, &headers, &method)?;
    let (user_id, is_admin) = owner_scope(&principal);
    state.conversations.get_for(&id, user_id.as_deref(), is_admin)?;
    state.conversations.delete(&id)?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// GET /api/v1/conversations/{id}/export
pub async fn export_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    let (user_id, is_admin) = owner_scope(&principal);
    let conversation = state.conversations.get_for(&id, user_id.as_deref(), is_admin)?;

    let assistant_name = conversation
        .assistant_id
        .as_deref()
        .and_then(|aid| state.assistants.get(aid, true).ok())
        .map(|a| a.name);
    let messages = state.conversations.list_messages(&id)?;

    Ok(Json(serde_json::json!({
        "id": conversation.id,
        "title": conversation.title,
        "assistant_name": assistant_name,
        "created_at": conversation.created_at,
        "updated_at": conversation.updated_at,
        "messages": messages,
    })))
}

/// POST /api/v1/conversations/{id}/messages — SSE chat turn.
///
/// Ownership is verified before the stream opens (404 on mismatch); after
/// that every outcome, including quota denials and upstream failures, is a
/// terminal frame inside the stream.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Response> {
    let principal = authenticate(&state, &headers)?;
    state.check_rate(RateCategory::Chat, &ctx)?;
    let (user_id, is_admin) = owner_scope(&principal);

    // Pre-stream ownership check so unknown/unowned conversations get a
    // plain 404 instead of an SSE body.
    state.conversations.get_for(&id, user_id.as_deref(), is_admin)?;

    let (tx, rx) = mpsc::channel::<ChatEvent>(32);
    let orchestrator = state.orchestrator();
    tokio::spawn(async move {
        let error_tx = tx.clone();
        if let Err(e) = orchestrator
            .send_message(&id, &req.content, req.model.as_deref(), user_id.as_deref(), is_admin, tx)
            .await
        {
            // The pre-check passed, so this is a race (e.g. concurrent
            // delete). Still terminate the stream with an error frame.
            warn!(error = %e, "chat turn failed after stream start");
            let _ = error_tx
                .send(ChatEvent::Error {
                    error: atrium_core::AtriumError::from(e).to_string(),
                    quota_exceeded: None,
                })
                .await;
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        Ok::<_, Infallible>(match Event::default().json_data(&event) {
            Ok(frame) => frame,
            Err(_) => Event::default().data("{\"type\":\"error\",\"error\":\"serialization\"}"),
        })
    });

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert("cache-control", HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}

/// POST /api/v1/messages/{id}/feedback
pub async fn message_feedback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Path(id): Path<String>,
    Json(req): Json<FeedbackRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    require_csrf(&state, &headers, &method)?;

    // Ownership flows through the message's conversation.
    let message = state.conversations.get_message(&id)?;
    let (user_id, is_admin) = owner_scope(&principal);
    state
        .conversations
        .get_for(&message.conversation_id, user_id.as_deref(), is_admin)?;

    let message = state.conversations.set_feedback(
        &id,
        &req.feedback,
        req.reason.as_deref(),
        req.context.as_deref(),
    )?;
    Ok(Json(serde_json::to_value(message)?))
}
