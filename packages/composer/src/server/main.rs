// Main entry point for the compose orchestration service

use std::sync::Arc;

use anyhow::{Context, Result};
use composer_core::domains::composes::register_compose_handlers;
use composer_core::kernel::external::{
    CommandDepsolver, CommandImageBuilder, CommandKojiClient, CommandManifestSource,
    ExternalProgram,
};
use composer_core::kernel::{
    run_watchdog, ComposerDeps, DistroRegistry, FsJobQueue, JobHandlerRegistry, JobQueue,
    WatchdogConfig, Worker, WorkerConfig,
};
use composer_core::server::build_app;
use composer_core::Config;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,composer_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting compose orchestration service");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(state_dir = %config.state_dir.display(), "Configuration loaded");

    let queue: Arc<dyn JobQueue> = Arc::new(
        FsJobQueue::open(&config.state_dir).context("Failed to open job queue state directory")?,
    );

    let deps = Arc::new(ComposerDeps {
        queue: queue.clone(),
        distros: DistroRegistry::with_defaults(),
        depsolver: Arc::new(CommandDepsolver(ExternalProgram::new(
            "depsolver",
            config.depsolver_command.clone(),
        ))),
        manifests: Arc::new(CommandManifestSource(ExternalProgram::new(
            "manifest-builder",
            config.manifest_command.clone(),
        ))),
        image_builder: Arc::new(CommandImageBuilder(ExternalProgram::new(
            "osbuild",
            config.osbuild_command.clone(),
        ))),
        koji: Arc::new(CommandKojiClient(ExternalProgram::new(
            "koji",
            config.koji_command.clone(),
        ))),
    });

    let shutdown = CancellationToken::new();

    // Reap jobs whose workers stopped heartbeating.
    tokio::spawn(run_watchdog(
        queue.clone(),
        WatchdogConfig {
            heartbeat_timeout: config.heartbeat_timeout,
            interval: config.watchdog_interval,
        },
        shutdown.clone(),
    ));

    // In-process worker pool.
    let mut registry = JobHandlerRegistry::new();
    register_compose_handlers(&mut registry);
    let registry = Arc::new(registry);
    for _ in 0..config.local_workers {
        let worker = Worker::new(
            deps.clone(),
            registry.clone(),
            WorkerConfig::new(registry.job_types()),
        );
        tokio::spawn(worker.run(shutdown.clone()));
    }
    tracing::info!(workers = config.local_workers, "worker pool started");

    let app = build_app(deps);

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    tracing::info!(listen = %config.listen, "API listening");

    let signal_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received shutdown signal");
            signal_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    // Stop workers and the watchdog once the server is down.
    shutdown.cancel();
    Ok(())
}
