use std::sync::Arc;

use codechat_relay::config::Config;
use codechat_relay::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Read config before tracing so CODECHAT_LOG can pick the level, but
    // report a bad config only once logging is up.
    let config = Config::load();
    let level = config.as_ref().map_or("info", |c| c.log_level.as_str());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = config.inspect_err(|e| tracing::error!("refusing to start: {e}"))?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?config.response_mode,
        environment = ?config.environment,
        model = %config.model,
        "codechat-relay starting"
    );

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::new(config)?);
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(addr = %bind_address, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("codechat-relay shutting down");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
