//! Shutdown signal handling shared by every daemon

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Completes on SIGINT, SIGTERM or SIGQUIT (Ctrl-C elsewhere)
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => info!(signal = "SIGINT", "shutdown requested"),
        _ = sigterm.recv() => info!(signal = "SIGTERM", "shutdown requested"),
        _ = sigquit.recv() => info!(signal = "SIGQUIT", "shutdown requested"),
    }
    Ok(())
}

/// Completes on Ctrl-C
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    Ok(())
}

/// Token cancelled by the first shutdown signal
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            warn!(error = %e, "cannot install signal handlers, shutting down");
        }
        trigger.cancel();
    });
    token
}
