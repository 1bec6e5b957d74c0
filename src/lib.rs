//! dummyhttp: a configurable dummy HTTP server
//!
//! In `dummy` mode every request is answered with a JSON document
//! describing it: method line, protocol, host, headers, body and peer
//! address, plus a configured greeting.

use thiserror::Error;

pub mod common;
pub mod config;
pub mod handler;
pub mod http;
pub mod server;

pub use config::{Config, ConfigError, HandlerOptions, Mode, ServerConfig};
pub use handler::{DispatchError, EchoHandler, EchoResponse, RequestHandler, build_handler, dispatch};
pub use server::{ServeError, Server, ServerState, ShutdownError};

/// Error types for the dummyhttp library
#[derive(Error, Debug)]
pub enum DummyError {
    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No handler available for the selected mode
    #[error("handler error: {0}")]
    Dispatch(#[from] DispatchError),

    /// The listener could not be bound or failed while serving
    #[error("server error: {0}")]
    Serve(#[from] ServeError),
}

/// Result type for the dummyhttp library
pub type Result<T> = std::result::Result<T, DummyError>;

/// Builds the handler for `config.mode` and serves until SIGINT/SIGTERM
pub async fn run(config: &Config) -> Result<()> {
    let handler = build_handler(config.mode, &config.handler)?;
    let server = Server::new(config.server.clone(), handler);
    let signals = server::spawn_signal_listener(server.shutdown_signal());

    let result = server.run().await;
    signals.abort();
    Ok(result?)
}
