//! Application server
//!
//! Binds the listener, serves the router until SIGINT or SIGTERM, then shuts
//! down the data source pools so no client outlives the process.

use crate::{
    config::Settings,
    server::{routes, state::AppState},
};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;

/// Main application struct
pub struct App {
    addr: SocketAddr,
    state: AppState,
}

impl App {
    /// Load data sources and start the data source service
    pub async fn new(settings: Settings) -> Result<Self> {
        let addr = settings
            .server_addr()
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid listen address {}", settings.server_addr()))?;

        tracing::debug!("Initializing application state");
        let state = AppState::new(settings).await?;

        Ok(Self { addr, state })
    }

    /// Serve until a shutdown signal arrives, then stop the pools
    pub async fn run_with_graceful_shutdown(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.addr))?;
        tracing::info!(addr = %self.addr, "Listening");

        let served = axum::serve(listener, routes::create_router(self.state.clone()))
            .with_graceful_shutdown(shutdown_signal())
            .await;

        // Pools are stopped even when serving failed
        self.stop_data_sources();
        served.context("Server error")
    }

    fn stop_data_sources(&self) {
        for stats in self.state.data_sources.pool_stats() {
            tracing::info!(
                pool = stats.pool,
                cached = stats.cached,
                in_flight = stats.in_flight,
                "Closing data source pool"
            );
        }
        self.state.data_sources.stop();
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Completes on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal_name = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    tracing::info!(signal = signal_name, "Shutdown signal received, draining requests");
}
