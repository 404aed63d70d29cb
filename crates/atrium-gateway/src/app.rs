use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use atrium_audit::AuditRecorder;
use atrium_auth::{ApiKeyStore, TokenIssuer, UserDirectory};
use atrium_chat::{AssistantStore, ChatOrchestrator, ConversationStore, WorkspaceStore};
use atrium_core::{AtriumConfig, AtriumError, RequestContext};
use atrium_ingest::IngestionPipeline;
use atrium_llm::PricingCache;
use atrium_quota::QuotaService;
use atrium_rag::{RagComposer, VectorStore};
use atrium_vault::KeyVault;

use crate::error::ApiResult;
use crate::provider::ProviderHandle;
use crate::rate_limit::{RateCategory, RateLimiter};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: AtriumConfig,
    pub issuer: TokenIssuer,
    pub users: UserDirectory,
    pub api_keys: ApiKeyStore,
    pub audit: AuditRecorder,
    pub vault: Arc<KeyVault>,
    pub provider: Arc<ProviderHandle>,
    pub quota: Arc<QuotaService>,
    pub workspaces: WorkspaceStore,
    pub assistants: Arc<AssistantStore>,
    pub conversations: Arc<ConversationStore>,
    pub composer: Arc<RagComposer>,
    pub vectors: VectorStore,
    pub pipeline: Arc<IngestionPipeline>,
    pub pricing: Arc<PricingCache>,
    pub limiter: RateLimiter,
    pub default_workspace_id: String,
}

impl AppState {
    /// Per-turn orchestrator bound to the currently active provider key.
    pub fn orchestrator(&self) -> ChatOrchestrator {
        ChatOrchestrator::new(
            self.conversations.clone(),
            self.assistants.clone(),
            self.composer.clone(),
            self.provider.clone(),
            self.quota.clone(),
            Arc::new(self.provider.client()),
            self.pricing.clone(),
        )
    }

    /// Count this request against its category's per-IP budget.
    pub fn check_rate(&self, category: RateCategory, ctx: &RequestContext) -> ApiResult<()> {
        let ip = ctx.ip_address.as_deref().unwrap_or("unknown");
        let limit = match category {
            RateCategory::Login => self.config.limits.login_per_minute,
            RateCategory::Chat => self.config.limits.chat_per_minute,
            RateCategory::Upload => self.config.limits.upload_per_minute,
            RateCategory::Settings => self.config.limits.settings_per_minute,
            RateCategory::Keys => self.config.limits.keys_per_minute,
        };
        self.limiter.check(category, ip, limit).map_err(|retry| {
            AtriumError::RateLimited {
                retry_after_secs: Some(retry),
            }
            .into()
        })
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // auth
        .route("/auth/login", post(crate::http::auth::admin_login))
        .route("/auth/user/login", post(crate::http::auth::user_login))
        // users + their API keys
        .route(
            "/users",
            get(crate::http::users::list_users).post(crate::http::users::create_user),
        )
        .route(
            "/users/{id}",
            get(crate::http::users::get_user)
                .patch(crate::http::users::update_user)
                .delete(crate::http::users::delete_user),
        )
        .route("/users/{id}/password", post(crate::http::users::change_password))
        .route("/users/{id}/activate", post(crate::http::users::activate_user))
        .route("/users/{id}/deactivate", post(crate::http::users::deactivate_user))
        .route(
            "/users/me/api-keys",
            get(crate::http::users::list_my_api_keys).post(crate::http::users::create_my_api_key),
        )
        .route(
            "/users/me/api-keys/{id}",
            delete(crate::http::users::revoke_my_api_key),
        )
        // assistants + knowledge files
        .route(
            "/assistants",
            get(crate::http::assistants::list_assistants)
                .post(crate::http::assistants::create_assistant),
        )
        .route(
            "/assistants/{id}",
            get(crate::http::assistants::get_assistant)
                .put(crate::http::assistants::update_assistant)
                .delete(crate::http::assistants::soft_delete_assistant),
        )
        .route(
            "/assistants/{id}/restore",
            post(crate::http::assistants::restore_assistant),
        )
        .route(
            "/assistants/{id}/purge",
            delete(crate::http::assistants::purge_assistant),
        )
        .route(
            "/assistants/{id}/files",
            get(crate::http::files::list_files).post(crate::http::files::upload_file),
        )
        .route(
            "/files/{id}",
            get(crate::http::files::get_file).delete(crate::http::files::delete_file),
        )
        .route("/files/{id}/reprocess", post(crate::http::files::reprocess_file))
        // conversations + messages
        .route(
            "/conversations",
            get(crate::http::conversations::list_conversations)
                .post(crate::http::conversations::create_conversation),
        )
        .route(
            "/conversations/{id}",
            get(crate::http::conversations::get_conversation)
                .patch(crate::http::conversations::update_conversation)
                .delete(crate::http::conversations::delete_conversation),
        )
        .route(
            "/conversations/{id}/export",
            get(crate::http::conversations::export_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            post(crate::http::conversations::send_message),
        )
        .route(
            "/messages/{id}/feedback",
            post(crate::http::conversations::message_feedback),
        )
        // workspaces
        .route(
            "/workspaces",
            get(crate::http::workspaces::list_workspaces)
                .post(crate::http::workspaces::create_workspace),
        )
        .route(
            "/workspaces/{id}",
            delete(crate::http::workspaces::delete_workspace),
        )
        // models + provider reachability
        .route("/models", get(crate::http::models::list_models))
        .route("/provider/status", get(crate::http::models::provider_status))
        // provider key vault
        .route(
            "/provider-keys",
            get(crate::http::provider_keys::list_keys).post(crate::http::provider_keys::create_key),
        )
        .route(
            "/provider-keys/{id}",
            patch(crate::http::provider_keys::update_key)
                .delete(crate::http::provider_keys::delete_key),
        )
        .route(
            "/provider-keys/{id}/default",
            post(crate::http::provider_keys::set_default_key),
        )
        .route(
            "/provider-keys/{id}/rotate",
            post(crate::http::provider_keys::rotate_key),
        )
        .route("/provider-keys/{id}/test", post(crate::http::provider_keys::test_key))
        // quotas
        .route(
            "/quotas/global",
            get(crate::http::quotas::get_global).patch(crate::http::quotas::update_global),
        )
        .route(
            "/quotas/users/{id}",
            get(crate::http::quotas::get_user_quota).put(crate::http::quotas::set_user_quota),
        )
        .route("/quotas/status", get(crate::http::quotas::usage_status))
        .route("/quotas/alerts", get(crate::http::quotas::usage_alerts))
        // audit
        .route("/audit", get(crate::http::audit::query_audit))
        .route("/audit/recent", get(crate::http::audit::recent_audit))
        .route(
            "/audit/resource/{resource_type}/{resource_id}",
            get(crate::http::audit::resource_history),
        );

    // Multipart uploads must clear axum's 2 MB default body cap; allow the
    // configured file size plus form-framing overhead.
    let body_limit = state.config.storage.max_file_size_bytes() as usize + 64 * 1024;

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .nest("/api/v1", api)
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::request_context,
        ))
        .layer(cors_layer(&state.config))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &AtriumConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderName::from_static("x-admin-token"),
            axum::http::HeaderName::from_static("x-csrf-token"),
            axum::http::HeaderName::from_static("x-request-id"),
        ]))
        .allow_credentials(true)
}
