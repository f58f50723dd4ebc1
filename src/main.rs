use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use newsrag::config::{Config, SessionBackendKind};
use newsrag::db::Db;
use newsrag::index::{ChunkStore, MemoryChunkStore, SqliteChunkStore, VectorIndex};
use newsrag::rag::{PipelineOptions, RagPipeline};
use newsrag::server::{self, AppState};
use newsrag::session::{SessionStore, SqliteBackend};
use newsrag::{embedder, generator, ingest};
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "newsrag", version, about = "News RAG chat server")]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Override the listen address from the config
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    info!("Starting newsrag...");

    // 1. Load config
    let mut config = Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    config.validate().context("Invalid configuration")?;

    // 2. Open the shared database lazily: only the sqlite session backend
    //    and the persistent index need it
    let needs_db = config.session.backend == SessionBackendKind::Sqlite || config.index.persist;
    let db = if needs_db {
        match Db::open(&config.db_path) {
            Ok(db) => Some(Arc::new(TokioMutex::new(db))),
            Err(e) => {
                warn!("Failed to open database {}: {e}", config.db_path);
                None
            }
        }
    } else {
        None
    };

    // 3. Session store
    let sessions = match (&db, config.session.backend) {
        (Some(db), SessionBackendKind::Sqlite) => {
            let backend = SqliteBackend::new(db.clone(), config.session_ttl());
            SessionStore::with_shared(Arc::new(backend)).await
        }
        (None, SessionBackendKind::Sqlite) => {
            warn!("Shared session backend unavailable, using in-memory sessions");
            SessionStore::in_memory()
        }
        (_, SessionBackendKind::Memory) => SessionStore::in_memory(),
    };
    info!("Session backend: {}", sessions.active_backend());

    // 4. Vector index
    let store: Arc<dyn ChunkStore> = match (&db, config.index.persist) {
        (Some(db), true) => Arc::new(SqliteChunkStore::new(db.clone())),
        (None, true) => {
            warn!("Persistent index unavailable, keeping chunks in memory");
            Arc::new(MemoryChunkStore::new())
        }
        (_, false) => Arc::new(MemoryChunkStore::new()),
    };
    let index = Arc::new(VectorIndex::new(store, config.index.dimensions));

    // 5. Providers
    let embedder = embedder::from_config(&config.embedding, config.index.dimensions)
        .context("Failed to build embedder")?;
    let source = ingest::from_config(&config.feed).context("Failed to build article source")?;
    let generator =
        generator::from_config(&config.generation).context("Failed to build generator")?;

    // 6. Pipeline, initialized in the background so the server answers at once
    let pipeline = Arc::new(RagPipeline::new(
        index,
        embedder,
        source,
        generator,
        PipelineOptions::from_config(&config),
    ));

    let shutdown = CancellationToken::new();
    let refresher = {
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                result = pipeline.initialize() => match result {
                    Ok(status) => info!("Pipeline initialized: {status:?}"),
                    Err(e) => error!("Pipeline initialization failed: {e}"),
                },
            }
            if let Err(e) = pipeline.spawn_refresh_loop(shutdown).await {
                warn!("Refresh loop ended abnormally: {e}");
            }
        })
    };

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {e}");
                return;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    // 7. Serve
    let state = AppState {
        sessions: Arc::new(sessions),
        pipeline,
    };
    server::serve(&config.bind_addr, state, &config.cors_origins, shutdown.clone()).await?;

    shutdown.cancel();
    if let Err(e) = refresher.await {
        warn!("Startup task ended abnormally: {e}");
    }
    info!("Server stopped");
    Ok(())
}
