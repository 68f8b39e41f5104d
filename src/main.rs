use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use credbroker::{config::BrokerConfig, router::RouterBuilder};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt::writer::MakeWriterExt};

/// Shared-credential broker: lends a pool of authenticated cookies to remote
/// workers under concurrency, priority, and per-domain allocation rules.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the INI-format config file.
    #[arg(long, default_value = "./server_config.ini")]
    config: PathBuf,

    /// Directory for cookie snapshots and the admin key.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Address to bind the HTTP/WS listener to.
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Log level filter, e.g. "info", "credbroker=debug".
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(log_level: &str, data_dir: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(data_dir, "credbroker.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr.and(non_blocking))
        .init();
    guard
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    let _ = enable_ansi_support::enable_ansi_support();

    let cli = Cli::parse();

    let mut config = match BrokerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };
    if let Some(data_dir) = cli.data_dir.clone() {
        config.store.data_dir = data_dir;
    }
    let data_dir = config.store.data_dir.clone();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {}: {e}", data_dir.display());
        std::process::exit(1);
    }

    let _log_guard = init_tracing(&cli.log_level, &data_dir);
    credbroker::config::BROKER_CONFIG.store(std::sync::Arc::new(config));

    info!("starting {}", credbroker::VERSION_INFO);

    let router = RouterBuilder::new(data_dir).await.with_default_setup().build();

    let listener = match tokio::net::TcpListener::bind(cli.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {e}", cli.bind);
            std::process::exit(1);
        }
    };
    info!("listening on {}", cli.bind);

    let app = router.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server error: {e}");
        std::process::exit(1);
    }

    info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}
