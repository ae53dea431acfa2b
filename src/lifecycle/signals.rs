//! OS signal handling.
//!
//! SIGINT (Ctrl-C) everywhere, SIGTERM on Unix. Either one triggers a
//! graceful shutdown.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;

/// Resolve on the first SIGINT or SIGTERM.
///
/// If a handler cannot be installed the error is logged and that signal is
/// never reported.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!(signal = "SIGINT", "Signal received"),
        () = terminate => tracing::info!(signal = "SIGTERM", "Signal received"),
    }
}

/// Trigger `shutdown` when the process is asked to stop.
pub fn spawn_signal_listener(shutdown: Arc<Shutdown>) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    })
}
