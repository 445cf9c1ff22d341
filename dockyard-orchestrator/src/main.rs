//! Dockyard Orchestrator
//!
//! HTTP front end of the build-and-deploy service.
//!
//! Architecture:
//! - Configuration: server flags via clap, engine settings from the environment
//! - API: axum handlers translating HTTP into service calls
//! - Services: build launching and log retention, container operations
//! - Background tasks: idle reaper and finished-log pruner

use anyhow::{Context, Result};
use clap::Parser;
use dockyard_runner::{
    ContainerRegistry, ContainerTeardown, DockerCli, DockerfileGenerator, EngineConfig,
    GitFetcher, IdleReaper, ImageBuilder, PipelineExecutor,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod service;

use crate::api::AppState;
use crate::config::Config;
use crate::service::build_service::BuildService;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dockyard_orchestrator=info,dockyard_runner=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Dockyard Orchestrator...");

    let config = Config::parse();
    let engine = EngineConfig::from_env().context("Failed to load engine configuration")?;
    engine
        .validate()
        .context("Invalid engine configuration")?;

    tracing::info!(
        "Loaded configuration: runtime={}, workspaces={}, ports={}..{}",
        engine.runtime_binary,
        engine.workspace_dir.display(),
        engine.port_range.start,
        engine.port_range.end
    );

    std::fs::create_dir_all(&engine.workspace_dir).with_context(|| {
        format!(
            "Failed to create workspace directory {}",
            engine.workspace_dir.display()
        )
    })?;

    // Wire the engine
    let registry = Arc::new(ContainerRegistry::new());
    let runtime = Arc::new(DockerCli::new(engine.runtime_binary.clone()));
    let builder: Arc<dyn ImageBuilder> = runtime.clone();
    let teardown: Arc<dyn ContainerTeardown> = runtime;

    if let Err(e) = builder.ping().await {
        tracing::warn!("Container runtime is not reachable yet: {}", e);
    }

    let executor = Arc::new(PipelineExecutor::new(
        Arc::new(GitFetcher::new(engine.git_binary.clone())),
        Arc::new(DockerfileGenerator::new()),
        Arc::clone(&builder),
        Arc::clone(&teardown),
        Arc::clone(&registry),
        engine.port_allocator(Arc::clone(&registry)),
        engine.executor_settings(),
    ));
    let builds = Arc::new(BuildService::new(executor, engine.log_buffer));

    // Background tasks
    let reaper = IdleReaper::new(
        Arc::clone(&registry),
        Arc::clone(&teardown),
        engine.reap_interval,
        engine.idle_threshold,
    )
    .spawn();
    let pruner = Arc::clone(&builds).spawn_pruner(config.prune_interval(), config.log_retention());

    // Build router with all API endpoints
    let cors = api::cors_layer(&config.cors_origin)
        .with_context(|| format!("Invalid CORS origin '{}'", config.cors_origin))?;
    let app = api::create_router(
        AppState {
            builds,
            registry,
            builder,
            teardown,
        },
        cors,
    );

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    reaper.abort();
    pruner.abort();
    tracing::info!("Dockyard Orchestrator stopped");

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
