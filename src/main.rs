//! CodeJudge execution worker
//!
//! Consumes execution jobs from a Redis Stream, runs each submission in a
//! sandboxed container and records the outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use codejudge::{
    config::Config,
    db::{self, PgJobStore},
    metrics::MetricsServer,
    queue::RedisJobQueue,
    sandbox::{DockerEngine, SandboxRunner},
    storage::FsBlobStore,
    worker::{ExecutionWorker, JobConsumer},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_new(&config.worker.rust_log)
        .unwrap_or_else(|_| EnvFilter::new(codejudge::constants::DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if config.worker.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting CodeJudge execution worker");

    // Create database pool
    tracing::info!("Connecting to database...");
    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;
    tracing::info!("Database connected");

    // Create Redis pool
    tracing::info!("Connecting to Redis...");
    let redis_cfg = deadpool_redis::Config::from_url(&config.redis.url);
    let redis_pool = redis_cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
    tracing::info!("Redis connected");

    // Connect to Docker
    let engine = DockerEngine::connect(config.sandbox.docker_socket.as_deref())?;
    let version = engine.version().await.context("Docker daemon unreachable")?;
    tracing::info!(version = %version, "Docker connected");

    let runner = Arc::new(SandboxRunner::new(Arc::new(engine), config.sandbox.clone()));
    runner
        .verify_assets()
        .await
        .context("Refusing to start without the runner script")?;

    let queue = Arc::new(RedisJobQueue::new(redis_pool, config.queue.clone()));
    queue.initialize().await?;

    let worker = Arc::new(ExecutionWorker::new(
        Arc::new(PgJobStore::new(db_pool)),
        Arc::new(FsBlobStore::new(&config.storage)),
        runner,
    ));

    // Create shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // Setup signal handlers
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        tracing::info!("Shutdown signal received, finishing in-flight jobs...");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    // Start metrics server
    let metrics_port = config.worker.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = MetricsServer::run(metrics_port).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    let consumer = JobConsumer::new(queue, worker, config.worker.concurrency, shutdown)
        .with_heartbeat(Duration::from_millis(config.queue.claim_idle_ms / 3));

    tracing::info!("Worker ready, starting job consumer loop");

    consumer.run().await?;

    tracing::info!("Worker shutdown complete");
    Ok(())
}
