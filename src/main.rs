//! Data Source Service
//!
//! Serves pooled clients for configured search cluster data sources and
//! validates candidate connections.

use anyhow::Result;
use clap::Parser;
use data_source_service::{
    config::{Environment, LogFormat, Settings},
    logging::init_tracing,
    server::App,
};
use std::path::PathBuf;

/// Data Source Service
///
/// Pooled, credential-aware clients for multiple search cluster data sources.
#[derive(Parser, Debug)]
#[command(name = "data-source-service")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides HOST env var)
    #[arg(long)]
    host: Option<String>,

    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: json, pretty (overrides LOG_FORMAT env var)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Environment: dev, staging, prod (overrides ENVIRONMENT env var)
    #[arg(short, long)]
    env: Option<Environment>,

    /// Data sources file, JSON, YAML or TOML (overrides DATA_SOURCES_FILE env var)
    #[arg(long)]
    data_sources: Option<PathBuf>,

    /// Maximum cached clients per pool (overrides DATA_SOURCE_MAX_CACHED_CLIENTS env var)
    #[arg(long)]
    max_cached_clients: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (before logging, so we can use log_level)
    let mut settings = Settings::load()?;

    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }
    if let Some(log_format) = args.log_format {
        settings.log_format = log_format;
    }
    if let Some(env) = args.env {
        settings.environment = env;
    }
    if let Some(path) = args.data_sources {
        settings.data_source.data_sources_file = Some(path);
    }
    if let Some(max) = args.max_cached_clients {
        settings.data_source.max_cached_clients = max;
    }
    settings.validate()?;

    init_tracing(&settings.log_level, settings.log_format)?;

    tracing::info!(
        app_name = %settings.app_name,
        version = %settings.app_version,
        environment = %settings.environment,
        host = %settings.host,
        port = %settings.port,
        max_cached_clients = settings.data_source.max_cached_clients,
        tls_verification = %settings.data_source.tls_verification,
        "Starting application"
    );

    let app = App::new(settings).await?;

    app.run_with_graceful_shutdown().await?;

    tracing::info!("Application shutdown complete");

    Ok(())
}
