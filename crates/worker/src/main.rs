use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hlsforge_core::quality::default_presets;
use hlsforge_db::models::worker::RegisterWorker;
use hlsforge_db::repositories::WorkerRepo;
use hlsforge_pipeline::executor::TranscodeExecutor;
use hlsforge_pipeline::runner::PipelineRunner;
use hlsforge_worker::cancel::CancellationRegistry;
use hlsforge_worker::config::WorkerConfig;
use hlsforge_worker::worker_loop::WorkerLoop;
use hlsforge_worker::{intake, reclaimer};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hlsforge_worker=debug,hlsforge_pipeline=info,hlsforge_db=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(
        worker = %config.worker_name,
        media_root = %config.media_root.display(),
        intake_dir = %config.intake_dir.display(),
        lease_secs = config.lease_secs,
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = hlsforge_db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    hlsforge_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    hlsforge_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Worker identity ---
    let worker = WorkerRepo::register(
        &pool,
        uuid::Uuid::new_v4(),
        &RegisterWorker {
            name: config.worker_name.clone(),
            hostname: WorkerConfig::hostname(),
            capabilities: config.capabilities.clone(),
        },
    )
    .await
    .expect("Failed to register worker");
    tracing::info!(worker_id = %worker.id, "Worker registered");

    let shutdown = CancellationToken::new();
    let registry = CancellationRegistry::new();

    let runner = Arc::new(PipelineRunner::new(
        pool.clone(),
        worker.id,
        config.worker_name.clone(),
        config.media_root.clone(),
        default_presets(),
        Arc::new(TranscodeExecutor::new()),
    ));

    // --- Background tasks ---
    let reclaimer_task = tokio::spawn(reclaimer::run_reclaimer(
        pool.clone(),
        config.reclaim_interval_secs,
        config.heartbeat_timeout_secs,
        shutdown.clone(),
    ));
    let intake_task = tokio::spawn(intake::run_intake(
        pool.clone(),
        config.intake_dir.clone(),
        config.rescan_interval_secs,
        shutdown.clone(),
    ));

    let worker_loop = WorkerLoop::new(
        pool.clone(),
        worker.id,
        config.capabilities.clone(),
        config.lease_secs,
        runner,
        registry.clone(),
    );
    let loop_shutdown = shutdown.clone();
    let loop_task = tokio::spawn(async move { worker_loop.run(loop_shutdown).await });

    // --- Graceful shutdown ---
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl-c");
    tracing::info!("Shutdown requested; draining");
    shutdown.cancel();

    let _ = loop_task.await;
    let _ = intake_task.await;
    let _ = reclaimer_task.await;
    tracing::info!("Worker stopped");
}
