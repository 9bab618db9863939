use tokio_util::sync::CancellationToken;

/// Return a token cancelled on SIGINT or, on unix, SIGTERM.
///
/// Worker dispatch loops watch the token and stop claiming new jobs;
/// handlers already running are left to finish. The token can also be
/// cancelled by hand, so callers may reuse it for programmatic shutdown.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signalled = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Interrupt handler unavailable");
                    return;
                }
                tracing::info!("Interrupted, stopping workers");
            }
            _ = terminate() => {
                tracing::info!("Terminated, stopping workers");
            }
        }
        signalled.cancel();
    });

    token
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
