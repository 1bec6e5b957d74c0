use std::io;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Waits for SIGINT or SIGTERM and returns the signal's name
#[cfg(unix)]
pub async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => Ok("SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

/// Waits for Ctrl-C
#[cfg(not(unix))]
pub async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

/// Spawns the single task that turns a termination signal into a
/// cancellation of `token`.
///
/// The task also exits quietly if the token is cancelled some other way.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            received = wait_for_signal() => match received {
                Ok(name) => {
                    info!(signal = name, "Received shutdown signal, stopping server");
                    token.cancel();
                }
                Err(e) => error!(error = %e, "Failed to install signal handlers"),
            },
            _ = token.cancelled() => {}
        }
    })
}
