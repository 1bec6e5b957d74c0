//! HTTP/1.x wire layer
//!
//! Request heads are parsed with `httparse`, bodies are framed by a
//! `tokio_util` codec and handed to handlers as an `AsyncRead`.

pub mod body;
pub mod client;
pub mod codec;
pub mod request;
pub mod response;

pub use body::BodyStream;
pub use client::{ClientResponse, HttpClient};
pub use codec::{Frame, HttpCodec, ProtocolError};
pub use request::{Body, BodyFraming, Request, RequestHead, canonical_header_name};
