//! flowd
//!
//! Accepts network flow measurements over HTTP and serves hourly bandwidth
//! aggregates per (source, destination, vpc) tuple from memory.

use anyhow::{Context, Result};
use clap::Parser;
use flowd::config::{FlowdConfig, LogFormat};
use flowd::metrics;
use flowd::server::http::{serve, AppState};
use flowd::store::history::HistoryKind;
use flowd::store::FlowStore;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "flowd")]
#[command(about = "Network flow aggregation service", long_about = None)]
#[command(version)]
struct Args {
    /// Listen address, e.g. "0.0.0.0:8080"
    #[arg(short, long)]
    listen: Option<String>,

    /// TOML configuration file
    #[arg(short, long, env = "FLOWD_CONFIG")]
    config: Option<PathBuf>,

    /// History strategy for flow keys (list, hour-indexed)
    #[arg(long)]
    history: Option<HistoryKind>,

    /// Log output format (text, json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut FlowdConfig) {
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(history) = self.history {
            config.history = history;
        }
        if let Some(log_format) = self.log_format {
            config.log_format = log_format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        FlowdConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate()?;

    init_tracing(args.verbose, config.log_format);

    info!("Starting flowd");
    info!("Configuration: {:?}", config);

    if let Err(e) = metrics::register_process_collector() {
        warn!("process metrics unavailable: {:#}", e);
    }

    let store = Arc::new(FlowStore::new(config.history));
    let listener = TcpListener::bind(&config.listen_addr)
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    serve(listener, AppState::new(store, config.max_body_bytes), shutdown)
        .await
        .context("HTTP server error")?;

    Ok(())
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(e) = res {
                            error!("unable to listen for SIGINT: {}", e);
                        }
                        info!("SIGINT received");
                    }
                    _ = term.recv() => info!("SIGTERM received"),
                }
            }
            Err(e) => {
                error!("unable to listen for SIGTERM: {}", e);
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("unable to listen for SIGINT: {}", e);
                }
            }
        }
    }

    #[cfg(not(unix))]
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("unable to listen for ctrl-c: {}", e);
    }

    shutdown.cancel();
}
