use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use clap::Parser;
use rusqlite::Connection;
use tokio::sync::watch;
use tracing::info;

use atrium_audit::AuditRecorder;
use atrium_auth::{ApiKeyStore, TokenIssuer, UserDirectory};
use atrium_chat::{AssistantStore, ConversationStore, WorkspaceStore};
use atrium_core::AtriumConfig;
use atrium_ingest::{FileStore, IngestionPipeline, IngestionReaper};
use atrium_llm::PricingCache;
use atrium_quota::QuotaService;
use atrium_rag::{RagComposer, VectorStore};
use atrium_vault::KeyVault;

mod app;
mod auth;
mod error;
mod http;
mod middleware;
mod provider;
mod rate_limit;

use provider::ProviderHandle;
use rate_limit::RateLimiter;

#[derive(Parser)]
#[command(name = "atrium-gateway", about = "Multi-tenant AI assistant backend")]
struct Args {
    /// Path to atrium.toml (default: ~/.atrium/atrium.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atrium=info,atrium_gateway=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    // config resolution: --config > ATRIUM_CONFIG env > ~/.atrium/atrium.toml
    let config_path = args.config.or_else(|| std::env::var("ATRIUM_CONFIG").ok());
    let config = AtriumConfig::load(config_path.as_deref())?;

    let state = bootstrap(config)?;
    let bind = state.config.server.bind.clone();
    let port = state.config.server.port;

    // Background reaper with a watch-channel shutdown signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = IngestionReaper::new(
        state.pipeline.clone(),
        state.config.ingestion.reaper_interval_seconds,
        state.config.ingestion.stale_processing_minutes,
    );
    let reaper_task = tokio::spawn(reaper.run(shutdown_rx));

    let router = app::build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "atrium gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    let _ = reaper_task.await;
    info!("atrium gateway stopped");

    Ok(())
}

/// Open the database, run idempotent schema init for every subsystem, seed
/// the canonical rows, and wire the shared state.
fn bootstrap(config: AtriumConfig) -> anyhow::Result<Arc<app::AppState>> {
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(&config.database.path)?;

    atrium_auth::db::init_db(&conn)?;
    atrium_audit::db::init_db(&conn)?;
    atrium_vault::db::init_db(&conn)?;
    atrium_quota::db::init_db(&conn)?;
    atrium_rag::db::init_db(&conn)?;
    atrium_ingest::db::init_db(&conn)?;
    atrium_chat::db::init_db(&conn)?;

    let db = Arc::new(Mutex::new(conn));

    let vault = Arc::new(KeyVault::new(db.clone(), config.security.secret_key.clone()));
    let provider = Arc::new(ProviderHandle::new(
        vault.clone(),
        config.provider.api_key.clone(),
        config.provider.base_url.clone(),
        config.provider.embedding_model.clone(),
    ));

    let workspaces = WorkspaceStore::new(db.clone());
    let default_workspace = workspaces.ensure_default()?;

    let quota = Arc::new(QuotaService::new(db.clone()));
    quota.get_or_create_global_quota()?;

    let pipeline = Arc::new(IngestionPipeline::new(
        FileStore::new(db.clone()),
        VectorStore::new(db.clone()),
        Box::new(provider::SharedEmbedder(provider.clone())),
        config.storage.upload_dir.clone(),
        config.storage.max_file_size_bytes(),
    ));

    let composer = Arc::new(RagComposer::new(
        Box::new(provider::SharedEmbedder(provider.clone())),
        VectorStore::new(db.clone()),
    ));

    let state = app::AppState {
        issuer: TokenIssuer::new(
            &config.security.secret_key,
            config.security.token_expire_hours,
        ),
        users: UserDirectory::new(db.clone()),
        api_keys: ApiKeyStore::new(db.clone()),
        audit: AuditRecorder::new(db.clone()),
        vault,
        provider,
        quota,
        workspaces,
        assistants: Arc::new(AssistantStore::new(db.clone())),
        conversations: Arc::new(ConversationStore::new(db.clone())),
        composer,
        vectors: VectorStore::new(db),
        pipeline,
        pricing: Arc::new(PricingCache::new()),
        limiter: RateLimiter::new(config.limits.enabled),
        default_workspace_id: default_workspace.id,
        config,
    };

    Ok(Arc::new(state))
}
