//! Session relay server.
//!
//! Run with: cargo run -p relay-server -- --config relay.json
//!
//! Then open http://localhost:3001 to follow pairing.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use session_relay_core::{ConnectionInfo, MessageTemplates, RelayConfig};
use session_relay_session::{
    BackendNotifier, LoopbackFactory, ManagerOptions, MemoryGuard, ProcessMemoryProbe,
    SessionManager,
};
use session_relay_transport::{AppState, router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("Unhandled panic: {info}");
    }));

    let config_path = config_path();
    let config = RelayConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    tracing::info!(
        service = %config.service_name,
        backend = %config.backend.base_url,
        "Configuration loaded"
    );

    let memory = Arc::new(MemoryGuard::new(ProcessMemoryProbe::new(), config.memory.ceiling_mb));
    let sampler = Arc::clone(&memory).spawn(Duration::from_millis(config.memory.sample_interval_ms));

    let notifier = BackendNotifier::new(&config.backend, config.backend_token());
    if !notifier.is_enabled() {
        tracing::warn!("No backend URL configured, notifications are disabled");
    }

    let factory = LoopbackFactory::auto_pairing(ConnectionInfo::new(&config.service_name, "loopback"));
    let manager = SessionManager::new(
        Arc::new(factory),
        notifier,
        memory,
        ManagerOptions::from_config(&config),
    );
    manager.initialize();

    let state = AppState::new(
        manager.clone(),
        &config.api_token,
        MessageTemplates::new(&config.service_name),
    );
    let app = router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down");
    manager.shutdown().await;
    sampler.abort();
    Ok(())
}

/// `--config <path>` wins over `RELAY_CONFIG`.
fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var_os("RELAY_CONFIG").map(PathBuf::from)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
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
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
