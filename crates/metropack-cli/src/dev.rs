use std::time::Duration;

use anyhow::Result;
use metropack_dev_server::run_server;
use tracing::info;

use crate::arguments::DevArguments;

pub async fn start_server(args: &DevArguments) -> Result<()> {
    let mut config = args.common.to_config()?;
    config.dev = true;
    config.server.port = args.port;
    config.watcher.debounce = Duration::from_millis(args.debounce_ms);

    run_server(config, shutdown_signal()).await
}

/// Resolves on SIGINT or SIGTERM; the server then stops accepting, drains
/// in-flight builds and tears down watcher, sockets and owners.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("installing the SIGTERM handler never fails");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutting down");
}
