//! Prometheus exporter for Oracle Database.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use oracle_exporter::config::LogFormat;
use oracle_exporter::db::{Connector, Dsn};
use oracle_exporter::{ExporterConfig, HttpServer, OracleCollector};

/// Environment variable holding `user/password@connect_string`.
const DSN_ENV: &str = "DATA_SOURCE_NAME";

/// Prometheus exporter for Oracle Database.
///
/// The database is selected by the DATA_SOURCE_NAME environment variable
/// (user/password@connect_string).
#[derive(Parser, Debug)]
#[command(name = "oracle-exporter")]
#[command(about = "Export Oracle Database diagnostics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on for web interface and telemetry (overrides config).
    #[arg(long = "web.listen-address")]
    listen_address: Option<String>,

    /// Path under which to expose metrics (overrides config).
    #[arg(long = "web.telemetry-path")]
    telemetry_path: Option<String>,

    /// Collect session counts.
    #[arg(long = "collect.sessions", action = ArgAction::Set)]
    collect_sessions: Option<bool>,

    /// Collect tablespace usage.
    #[arg(long = "collect.tablespaces", action = ArgAction::Set)]
    collect_tablespaces: Option<bool>,

    /// Collect archive log statistics.
    #[arg(long = "collect.archivelog", action = ArgAction::Set)]
    collect_archivelog: Option<bool>,

    /// Collect resource limit utilization.
    #[arg(long = "collect.resource_limit", action = ArgAction::Set)]
    collect_resource_limit: Option<bool>,

    /// Log level (trace, debug, info, warn, error). Overrides config.
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of the file configuration.
    fn apply(&self, config: &mut ExporterConfig) {
        if let Some(listen) = &self.listen_address {
            config.web.listen = listen.clone();
        }
        if let Some(path) = &self.telemetry_path {
            config.web.path = path.clone();
        }
        if let Some(enabled) = self.collect_sessions {
            config.collect.sessions = enabled;
        }
        if let Some(enabled) = self.collect_tablespaces {
            config.collect.tablespaces = enabled;
        }
        if let Some(enabled) = self.collect_archivelog {
            config.collect.archivelog = enabled;
        }
        if let Some(enabled) = self.collect_resource_limit {
            config.collect.resource_limit = enabled;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[cfg(feature = "oracle")]
fn connector(dsn: Dsn) -> anyhow::Result<Arc<dyn Connector>> {
    Ok(Arc::new(oracle_exporter::db::oracle::OracleConnector::new(dsn)))
}

#[cfg(not(feature = "oracle"))]
fn connector(_dsn: Dsn) -> anyhow::Result<Arc<dyn Connector>> {
    anyhow::bail!("oracle-exporter was built without the `oracle` feature")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)
            .with_context(|| format!("Failed to load {}", config_path))?
    } else {
        ExporterConfig::default()
    };
    args.apply(&mut config);
    config.validate()?;

    // Initialize logging
    let log_level = config.logging.level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("oracle_exporter={}", log_level).parse()?);

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Oracle DB exporter");

    let dsn = std::env::var(DSN_ENV).with_context(|| format!("{} is not set", DSN_ENV))?;
    let dsn = Dsn::parse(&dsn).with_context(|| format!("{} is malformed", DSN_ENV))?;
    info!(database = %dsn, "Using data source");

    let collector = Arc::new(OracleCollector::from_config(&config, connector(dsn)?)?);

    let listen_addr = config
        .web
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Bind before spawning so a busy port fails startup
    let server = HttpServer::new(collector.clone(), listen_addr, config.web.path.clone())
        .bind()
        .await?;

    let http_task = tokio::spawn(async move {
        if let Err(e) = server.serve(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    let stats = collector.stats();
    info!(
        scrapes_total = stats.scrapes_total,
        scrape_errors = ?stats.scrape_errors,
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

async fn terminate() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
