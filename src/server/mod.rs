//! Server lifecycle
//!
//! A [`Server`] moves through `Idle → Serving → ShuttingDown → Stopped`.
//! It serves until its cancellation token fires, then stops accepting,
//! lets in-flight requests finish and closes idle connections.

pub mod connection;
pub mod signal;

pub use connection::Connection;
pub use signal::{spawn_signal_listener, wait_for_signal};

use crate::config::ServerConfig;
use crate::handler::RequestHandler;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, error, info, warn};

/// Pause before retrying after a transient accept failure
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Serving,
    ShuttingDown,
    Stopped,
}

/// Fatal listener failures
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

/// In-flight connections outlived the drain deadline
#[derive(Debug, Error)]
#[error("graceful shutdown timed out after {timeout:?} with {in_flight} connection(s) still open")]
pub struct ShutdownError {
    pub timeout: Duration,
    pub in_flight: usize,
}

/// HTTP server driving one request handler
///
/// # Examples
///
/// ```no_run
/// use dummyhttp::config::{HandlerOptions, ServerConfig};
/// use dummyhttp::handler::EchoHandler;
/// use dummyhttp::server::Server;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let handler = Arc::new(EchoHandler::new(&HandlerOptions::default()));
///     let server = Server::new(ServerConfig::default(), handler);
///     let shutdown = server.shutdown_signal();
///
///     let running = tokio::spawn(async move { server.run().await });
///
///     // Later: stop accepting and drain
///     shutdown.cancel();
///     running.await??;
///     Ok(())
/// }
/// ```
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn RequestHandler>,
    shutdown: CancellationToken,
    state: watch::Sender<ServerState>,
}

impl Server {
    pub fn new(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> Self {
        let (state, _) = watch::channel(ServerState::Idle);
        Self {
            config,
            handler,
            shutdown: CancellationToken::new(),
            state,
        }
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Binds the configured address and serves until shutdown
    pub async fn run(&self) -> Result<(), ServeError> {
        let address = self.config.bind_address();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state.send_replace(ServerState::Stopped);
                return Err(ServeError::Bind { address, source });
            }
        };
        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServeError> {
        let local_addr = listener.local_addr().ok();
        self.state.send_replace(ServerState::Serving);
        info!(address = ?local_addr, timeout = ?self.config.timeout, "Server listening");

        let tracker = TaskTracker::new();
        let connections = self.shutdown.child_token();
        let result = self.accept_loop(&listener, &tracker, &connections).await;

        drop(listener);
        self.state.send_replace(ServerState::ShuttingDown);
        // Idle connections close right away; busy ones finish their request
        connections.cancel();
        tracker.close();

        if let Err(e) = self.drain(&tracker).await {
            warn!(error = %e, "Graceful shutdown incomplete");
        }

        self.state.send_replace(ServerState::Stopped);
        match &result {
            Ok(()) => info!("Server stopped"),
            Err(e) => error!(error = %e, "Server failed"),
        }
        result
    }

    async fn accept_loop(
        &self,
        listener: &TcpListener,
        tracker: &TaskTracker,
        connections: &CancellationToken,
    ) -> Result<(), ServeError> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_connection(stream, addr, tracker, connections),
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, "Failed to accept connection, retrying");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => return Err(ServeError::Accept(e)),
                },
            }
        }
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        tracker: &TaskTracker,
        connections: &CancellationToken,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%addr, error = %e, "Failed to set TCP_NODELAY");
        }
        let connection = Connection::new(
            stream,
            addr,
            self.handler.clone(),
            self.config.timeout,
            connections.clone(),
        );
        let span = tracing::info_span!("connection", %addr);
        tracker.spawn(
            async move {
                info!("Accepted connection");
                if let Err(e) = connection.serve().await {
                    warn!(error = %e, "Error handling connection");
                }
                info!("Connection closed");
            }
            .instrument(span),
        );
    }

    /// Waits for tracked connections, bounded by the configured timeout
    async fn drain(&self, tracker: &TaskTracker) -> Result<(), ShutdownError> {
        if tracker.is_empty() {
            return Ok(());
        }
        info!(in_flight = tracker.len(), "Waiting for in-flight connections");
        timeout(self.config.timeout, tracker.wait())
            .await
            .map_err(|_| ShutdownError {
                timeout: self.config.timeout,
                in_flight: tracker.len(),
            })
    }
}

/// Accept failures worth retrying: the peer went away, or the process ran
/// out of descriptors or buffers for a moment.
fn is_transient(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) {
        return true;
    }
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
        )
    }
    #[cfg(not(unix))]
    {
        false
    }
}
