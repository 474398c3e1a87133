use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Cancel `token` on the first SIGINT or SIGTERM.
///
/// Module processes run in their own process groups and never see these
/// signals directly; the process runner relays termination to them.
///
/// SIGHUP is left alone. A session hangup is not an operator stop, and
/// runs started under `nohup` rely on the inherited ignore disposition.
#[cfg(unix)]
pub fn forward_to(token: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        warn!("Received {name}, stopping the running module");
        token.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn forward_to(token: CancellationToken) -> std::io::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, stopping the running module");
            token.cancel();
        }
    });
    Ok(())
}
