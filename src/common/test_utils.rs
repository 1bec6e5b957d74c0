use crate::config::{HandlerOptions, ServerConfig};
use crate::handler::EchoHandler;
use crate::server::{ServeError, Server, ServerState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// An echo server running on an ephemeral loopback port
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: CancellationToken,
    pub state: watch::Receiver<ServerState>,
    pub handle: JoinHandle<Result<(), ServeError>>,
}

impl TestServer {
    /// Cancels the server and waits for it to finish draining
    pub async fn stop(self) -> Result<(), ServeError> {
        self.shutdown.cancel();
        self.handle.await.map_err(|e| {
            ServeError::Accept(std::io::Error::other(format!("server task failed: {e}")))
        })?
    }
}

/// Starts an echo server answering with `message`
///
/// The listener is bound before this returns, so clients may connect
/// immediately.
pub async fn spawn_test_server(message: &str, timeout: Duration) -> std::io::Result<TestServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let options = HandlerOptions {
        message: message.to_string(),
        ..HandlerOptions::default()
    };
    let config = ServerConfig {
        listen: addr.to_string(),
        timeout,
    };
    let server = Server::new(config, Arc::new(EchoHandler::new(&options)));
    let shutdown = server.shutdown_signal();
    let state = server.subscribe_state();

    let handle = tokio::spawn(async move { server.serve(listener).await });

    Ok(TestServer {
        addr,
        shutdown,
        state,
        handle,
    })
}
