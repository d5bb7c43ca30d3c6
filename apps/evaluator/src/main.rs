mod config;
mod db;
mod documents;
mod errors;
mod evaluation;
mod llm_client;
mod models;
mod queue;
mod retrieval;
mod routes;
mod state;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, S3Settings, StrategyKind};
use crate::db::{create_pool, run_migrations};
use crate::documents::{PdfTextExtractor, PgDocumentLookup};
use crate::evaluation::{
    DirectStrategy, EvaluationStrategy, EvaluationWorker, PgRecordStore, RagStrategy,
};
use crate::llm_client::LlmClient;
use crate::queue::{shutdown_channel, JobHandler, RedisJobQueue};
use crate::retrieval::{ContextIndex, HttpEmbedder, IndexSnapshot, SemanticIndex};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting evaluator v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    run_migrations(&db).await?;

    // Initialize Redis queue
    let redis = redis::Client::open(config.redis_url.clone())?;
    let queue = Arc::new(RedisJobQueue::connect(redis, config.queue.clone()).await?);
    info!("Redis queue '{}' connected", config.queue.name);

    // Initialize S3 / MinIO (only needed for s3:// document paths)
    let s3 = match &config.s3 {
        Some(settings) => {
            info!("S3 client initialized ({})", settings.endpoint);
            Some(build_s3_client(settings).await)
        }
        None => None,
    };

    // Initialize LLM client
    let llm = LlmClient::new(config.llm.clone())?;
    info!("LLM client initialized (model: {})", llm.model());
    if config.llm.api_key.is_none() {
        warn!("OPENROUTER_KEY is not set; every LLM call will fail");
    }

    // Initialize evaluation strategy
    let strategy: Arc<dyn EvaluationStrategy> = match config.strategy {
        StrategyKind::Rag => Arc::new(RagStrategy::new(
            load_index(&config).await,
            config.retrieval.top_k,
        )),
        StrategyKind::Direct => Arc::new(DirectStrategy),
    };
    info!("Evaluation strategy: {}", strategy.name());

    // Build the worker and app state
    let records = Arc::new(PgRecordStore::new(db.clone()));
    let worker: Arc<dyn JobHandler> = Arc::new(EvaluationWorker::new(
        Arc::new(PgDocumentLookup::new(db)),
        Arc::new(PdfTextExtractor::new(s3)),
        strategy,
        Arc::new(llm),
        records.clone(),
    ));

    let state = AppState {
        records,
        queue: queue.clone(),
    };

    // Start queue consumers
    let (shutdown, token) = shutdown_channel();
    queue.recover_stalled().await?;

    let mut consumers = Vec::with_capacity(config.queue.concurrency);
    for consumer in 0..config.queue.concurrency.max(1) {
        let queue = queue.clone();
        let worker = worker.clone();
        let token = token.clone();
        consumers.push(tokio::spawn(async move {
            if let Err(e) = queue.run(consumer, worker, token).await {
                error!(consumer, "Queue consumer exited: {e}");
            }
        }));
    }

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
        }
        info!("Shutdown requested; draining consumers");
        shutdown.trigger();
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(token.triggered())
        .await?;

    for consumer in consumers {
        consumer.await?;
    }

    info!("Evaluator stopped");
    Ok(())
}

/// Loads the rubric index snapshot. A failure is logged, not fatal: jobs then
/// fail fast with an index-unavailable error.
async fn load_index(config: &Config) -> Option<Arc<dyn ContextIndex>> {
    let snapshot = match IndexSnapshot::load(&config.retrieval.index_path).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("Rubric index unavailable: {e}");
            return None;
        }
    };

    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.llm.timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build embedding client: {e}");
            return None;
        }
    };

    let embedder = Arc::new(HttpEmbedder::new(
        client,
        config.retrieval.embedding_api_url.clone(),
        config
            .retrieval
            .embedding_api_key
            .clone()
            .or_else(|| config.llm.api_key.clone()),
    ));
    let index: Arc<dyn ContextIndex> = Arc::new(SemanticIndex::new(snapshot, embedder));
    Some(index)
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(settings: &S3Settings) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &settings.access_key_id,
        &settings.secret_access_key,
        None,
        None,
        "evaluator-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&settings.endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
