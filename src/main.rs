//! mirrorgate -- redundant file retrieval edge server.
//!
//! SIGTERM/SIGINT stop accepting connections; outstanding background cache
//! writes are then given `server.shutdown_timeout` seconds to finish.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use mirrorgate::cache::MemoryCache;
use mirrorgate::config::LoggingConfig;
use mirrorgate::upstream::ReqwestUpstream;

/// Command-line arguments for the mirrorgate server.
#[derive(Parser, Debug)]
#[command(
    name = "mirrorgate",
    version,
    about = "Races GitHub, GitLab and R2 for the same file and serves the first success"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "mirrorgate.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = mirrorgate::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        mirrorgate::metrics::init_metrics()?;
        mirrorgate::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let upstream = Arc::new(ReqwestUpstream::new(Duration::from_secs(
        config.upstream.timeout,
    ))?);
    let cache = Arc::new(MemoryCache::new(Duration::from_secs(config.cache.max_age)));
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);

    let state = Arc::new(mirrorgate::AppState::new(config, upstream, cache));
    info!(
        "Catalog resolved: {} backend(s), status page {}",
        state.catalog.backends.len(),
        if state.config.status_secret().is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );

    let app = mirrorgate::server::app(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("mirrorgate listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain detached cache writes before exiting.
    let tracker = state.cache.tracker();
    tracker.close();
    if tokio::time::timeout(shutdown_timeout, tracker.wait())
        .await
        .is_err()
    {
        warn!(
            "{} cache write(s) still pending after {:?}",
            tracker.len(),
            shutdown_timeout
        );
    }

    info!("mirrorgate shut down");

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides `logging.level`.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
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
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
