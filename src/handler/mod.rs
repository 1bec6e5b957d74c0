//! Request handlers and mode dispatch

pub mod dispatch;
pub mod echo;

pub use dispatch::{DispatchError, build_handler, dispatch};
pub use echo::{EchoError, EchoHandler, EchoResponse, flatten_headers};

use crate::http::Request;
use async_trait::async_trait;
use bytes::Bytes;
use http::Response;

/// Turns one request into one response
///
/// Implementations are shared across every connection, so they must not
/// keep per-request state.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request<'_>) -> Response<Bytes>;
}
