//! Service startup and serve loop for clipsqueeze
//!
//! Wires configuration, startup checks, the concurrency plan, metrics, the job
//! controller, and the HTTP router together.

use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::{Config, ConfigError};
use crate::controller::JobController;
use crate::http::{create_router, AppState};
use crate::metrics::{new_shared_metrics, SharedMetrics};
use crate::startup::{run_startup_checks, StartupError};
use crate::workspace::WorkspaceError;
use axum::Router;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Error type for service operations
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Workspace root could not be prepared
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("Invalid listen address {0}")]
    Address(String),
}

/// Service state containing all runtime components
pub struct Service {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Derived concurrency plan
    pub concurrency_plan: ConcurrencyPlan,
    /// Shared metrics state
    pub metrics: SharedMetrics,
    /// Runs compression jobs
    pub controller: Arc<JobController>,
}

impl Service {
    /// Initialize the service with configuration from file
    ///
    /// 1. Load config from file (defaults if missing) and apply environment overrides
    /// 2. Run startup checks (ffmpeg, ffprobe, encoder)
    /// 3. Derive concurrency plan
    /// 4. Initialize shared metrics and the job controller
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, ServiceError> {
        let config = Config::load_or_default(config_path)?;
        Self::with_config(config)
    }

    /// Initialize the service with an existing configuration, running startup checks
    pub fn with_config(config: Config) -> Result<Self, ServiceError> {
        run_startup_checks(&config)?;
        Ok(Self::new_without_checks(config))
    }

    /// Initialize the service without running startup checks
    ///
    /// Useful for testing when ffmpeg and ffprobe are not available.
    pub fn new_without_checks(config: Config) -> Self {
        let concurrency_plan = derive_plan(&config);
        let metrics = new_shared_metrics();
        let controller = Arc::new(JobController::from_config(
            &config,
            concurrency_plan.clone(),
            metrics.clone(),
        ));

        Self {
            config,
            concurrency_plan,
            metrics,
            controller,
        }
    }

    /// Get the shared metrics
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            controller: self.controller.clone(),
            metrics: self.metrics.clone(),
            default_target_size_mb: self.config.jobs.default_target_size_mb,
        };
        create_router(state, &self.config.server)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ServiceError> {
        let raw = format!("{}:{}", self.config.server.host, self.config.server.port);
        raw.parse().map_err(|_| ServiceError::Address(raw))
    }

    /// Serve HTTP until ctrl-c
    pub async fn run(&self) -> Result<(), ServiceError> {
        self.controller.workspace_root().ensure().await?;

        let addr = self.listen_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(
            %addr,
            workspace_root = %self.controller.workspace_root().path().display(),
            max_concurrent_encodes = self.concurrency_plan.max_concurrent_encodes,
            threads_per_encode = self.concurrency_plan.threads_per_encode,
            "Listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
