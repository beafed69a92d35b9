use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }
}

/// Resolves with the first stop signal the process receives.
pub(crate) async fn wait_for_signal() -> ShutdownSignal {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => ShutdownSignal::Interrupt,
        _ = terminate => ShutdownSignal::Terminate,
    };

    tracing::info!(signal = received.as_str(), "Shutdown signal received, draining requests");
    received
}

/// Broadcasts stop to the grading workers and waits for each of them.
/// Returns how many exited cleanly; queued runs that never started are dropped.
pub(crate) async fn stop_workers(
    shutdown: &watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
) -> usize {
    if shutdown.send(true).is_err() {
        tracing::warn!("Grading workers already gone before shutdown broadcast");
    }

    let total = workers.len();
    let mut stopped = 0;
    for handle in workers {
        match handle.await {
            Ok(()) => stopped += 1,
            Err(err) => tracing::error!(error = %err, "Grading worker join failed"),
        }
    }

    tracing::info!(stopped, total, "Grading workers stopped");
    stopped
}
