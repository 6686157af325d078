//! What ends a running runtime: a termination signal or an external token.

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Why a graceful shutdown started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Ctrl+C / SIGINT.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// The host cancelled the token passed to `RuntimeOptions::shutdown_on`.
    Token,
}

/// Wait for SIGINT or SIGTERM, whichever arrives first.
///
/// # Errors
/// Returns an error if a signal listener cannot be installed.
pub async fn wait_for_shutdown() -> Result<ShutdownSignal> {
    #[cfg(unix)]
    let received = {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM listener")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("failed to listen for Ctrl+C")?;
                ShutdownSignal::Interrupt
            }
            _ = terminate.recv() => ShutdownSignal::Terminate,
        }
    };

    #[cfg(not(unix))]
    let received = {
        signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        ShutdownSignal::Interrupt
    };

    tracing::info!(signal = ?received, "termination signal received");
    Ok(received)
}

/// Resolves when the runtime should start its graceful shutdown.
///
/// With an external token only the token counts. Otherwise signals are awaited; if the
/// listeners cannot be installed, plain Ctrl+C is tried before waiting forever.
pub(super) async fn wait_trigger(external: Option<CancellationToken>) -> ShutdownSignal {
    if let Some(token) = external {
        token.cancelled().await;
        return ShutdownSignal::Token;
    }

    match wait_for_shutdown().await {
        Ok(received) => received,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "signal listener failed; using ctrl_c only");
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!(error = %err, "no signal listener available; shutdown hook idle");
                std::future::pending::<()>().await;
            }
            ShutdownSignal::Interrupt
        }
    }
}
