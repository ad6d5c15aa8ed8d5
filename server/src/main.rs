//! Devshell Server
//!
//! Boots a sandbox for a repository, installs its dependencies, starts its
//! dev server and exposes the lifecycle over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod domain;
mod error;
mod infra;
mod service;

pub use config::Config;
pub use error::{Error, Result};

use infra::docker::DockerManager;
use infra::docker_sandbox::DockerSandboxHost;
use infra::github::GithubSynchronizer;
use infra::host::SandboxHost;
use infra::local::LocalSandboxHost;
use service::inference::{CommandPrompt, ConfiguredScript};
use service::observer::LifecycleBridge;
use service::orchestrator::Orchestrator;
use service::templates::TemplateRegistry;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Orchestrator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::load()?);

    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let http_addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port).parse()?;
    info!("Starting Devshell Server");
    info!("HTTP listening on {}", http_addr);

    // Initialize infrastructure
    tokio::fs::create_dir_all(&config.workspace_dir).await?;
    let host: Arc<dyn SandboxHost> = match config.sandbox_backend.as_str() {
        "docker" => {
            let docker = Arc::new(DockerManager::new(None, &config.base_image)?);
            Arc::new(DockerSandboxHost::new(docker, config.clone()))
        }
        "local" => Arc::new(LocalSandboxHost::new(
            &config.workspace_dir,
            Duration::from_millis(config.ready_poll_ms),
        )),
        other => anyhow::bail!("unknown sandbox backend: {}", other),
    };
    info!("Sandbox backend: {}", host.name());

    let synchronizer = Arc::new(GithubSynchronizer::new(
        &config.github_api_url,
        config.github_token.clone(),
        config.sync_max_file_bytes,
        config.sync_concurrency,
    )?);
    let prompt = config
        .fallback_script
        .clone()
        .map(|script| Arc::new(ConfiguredScript(script)) as Arc<dyn CommandPrompt>);
    let startup_timeout = match config.startup_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    // Initialize services
    let orchestrator = Orchestrator::new(
        host,
        synchronizer,
        Arc::new(TemplateRegistry::bundled()),
        Arc::new(LifecycleBridge::new(config.max_console_lines)),
        prompt,
        startup_timeout,
    );

    let state = AppState {
        config: config.clone(),
        orchestrator: orchestrator.clone(),
    };
    let app = api::http::create_router(state);

    let result = axum::serve(tokio::net::TcpListener::bind(http_addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = result {
        error!("HTTP server error: {}", e);
    }

    orchestrator.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Received shutdown signal");
}
