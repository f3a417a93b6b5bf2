//! Composition root: loads configuration, wires up logging, builds the
//! `RelayCore` and its background tasks, and serves the HTTP/WebSocket
//! router until shutdown.

use relay_core::RelayCore;
use relay_server::config::ServerConfig;
use relay_server::error::ServerError;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = ServerConfig::from_env();
    let _log_guard = init_logging(&config.log_level, &config.log_dir);

    if let Err(err) = run(config).await {
        error!(%err, "fatal startup error");
        std::process::exit(1);
    }
}

/// Installs a stdout subscriber plus, unconditionally, a non-blocking daily
/// rolling file appender under `log_dir` — mirroring the source's
/// `logging.FileHandler` alongside its console handler. Returns the guard
/// that must stay alive for the file writer to flush.
fn init_logging(log_level: &str, log_dir: &str) -> tracing_appender::non_blocking::WorkerGuard {
    std::fs::create_dir_all(log_dir).unwrap_or_else(|err| {
        eprintln!("warning: failed to create log directory {log_dir}: {err}");
    });
    let file_appender = tracing_appender::rolling::daily(log_dir, "relay-server.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level.to_owned()))
        .with_writer(std::io::stdout.and(non_blocking))
        .init();

    guard
}

async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let bind_addr = config.bind_addr.clone();
    let core = RelayCore::new(config.relay);
    let liveness = core.spawn_liveness();

    let router = relay_server::build_router(core.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|source| ServerError::Bind { addr: bind_addr.clone(), source })?;
    info!(addr = %bind_addr, "relay server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    liveness.shutdown().await;
    core.registry.close_all().await;
    info!("relay server shut down gracefully");
    Ok(())
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        () = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
