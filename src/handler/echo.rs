use super::RequestHandler;
use crate::config::HandlerOptions;
use crate::http::request::canonical_header_name;
use crate::http::{Request, response};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::HOST;
use http::{HeaderMap, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use std::collections::BTreeMap;
use std::io;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Structured reflection of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponse {
    #[serde(rename = "proto")]
    pub protocol: String,
    pub host: String,
    #[serde(rename = "request")]
    pub request_line: String,
    pub headers: BTreeMap<String, String>,
    pub message: String,
    pub body: String,
    #[serde(rename = "remote_addr")]
    pub remote_address: String,
    /// Bytes actually read, whatever the client declared
    pub content_length: u64,
}

impl EchoResponse {
    /// Indented JSON, one space per level
    pub fn to_json(&self) -> Result<Bytes, EchoError> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b" "));
        self.serialize(&mut serializer)?;
        Ok(Bytes::from(out))
    }
}

#[derive(Debug, Error)]
pub enum EchoError {
    #[error("{0}")]
    BodyRead(#[from] io::Error),
    #[error("{0}")]
    Serialization(#[from] serde_json::Error),
}

/// Echoes every request back as JSON, tagged with a configured message
#[derive(Debug, Clone)]
pub struct EchoHandler {
    message: String,
}

impl EchoHandler {
    pub fn new(options: &HandlerOptions) -> Self {
        Self {
            message: options.message.clone(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Reads the whole body and builds the echo document
    pub async fn echo(&self, request: Request<'_>) -> Result<EchoResponse, EchoError> {
        let Request {
            head,
            remote_addr,
            mut body,
        } = request;

        let mut buf = Vec::new();
        let read = body.read_to_end(&mut buf).await?;

        Ok(EchoResponse {
            protocol: head.protocol().to_string(),
            host: head.host(),
            request_line: format!("{} {}", head.method, head.target),
            headers: flatten_headers(&head.headers),
            message: self.message.clone(),
            body: String::from_utf8_lossy(&buf).into_owned(),
            remote_address: remote_addr.to_string(),
            content_length: read as u64,
        })
    }
}

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle(&self, request: Request<'_>) -> Response<Bytes> {
        match self.echo(request).await.and_then(|echo| echo.to_json()) {
            Ok(json) => {
                debug!(size = json.len(), "Echoed request");
                response::json(json)
            }
            Err(e) => {
                warn!(error = %e, "Failed to echo request");
                response::plain_error(StatusCode::INTERNAL_SERVER_ERROR, e)
            }
        }
    }
}

/// One entry per header name, repeated values joined with `"; "` in order.
/// `Host` is reported separately and left out.
pub fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .keys()
        .filter(|name| **name != HOST)
        .map(|name| {
            let joined = headers
                .get_all(name)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()))
                .collect::<Vec<_>>()
                .join("; ");
            (canonical_header_name(name.as_str()), joined)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestHead;
    use http::header::CONTENT_TYPE;
    use std::net::SocketAddr;
    use std::sync::Arc;

    const REMOTE: &str = "192.0.2.1:1234";

    fn handler(message: &str) -> EchoHandler {
        EchoHandler::new(&HandlerOptions {
            message: message.to_string(),
            ..Default::default()
        })
    }

    fn head(raw: &str) -> RequestHead {
        RequestHead::parse(raw.as_bytes()).unwrap().unwrap().0
    }

    fn request(raw_head: &str, body: &'static [u8]) -> Request<'static> {
        Request::new(head(raw_head), REMOTE.parse::<SocketAddr>().unwrap(), body)
    }

    async fn handle(handler: &EchoHandler, request: Request<'_>) -> (Response<Bytes>, EchoResponse) {
        let response = handler.handle(request).await;
        let echo = serde_json::from_slice(response.body()).unwrap();
        (response, echo)
    }

    #[test]
    fn test_handler_new() {
        assert_eq!(handler("test message").message(), "test message");
        assert_eq!(handler("").message(), "");
        assert_eq!(EchoHandler::new(&HandlerOptions::default()).message(), "hello, world");
    }

    #[tokio::test]
    async fn test_basic_get_request() {
        let h = handler("hello test");
        let req = request(
            "GET /test HTTP/1.1\r\nHost: example.com\r\nX-Test-Header: test-value\r\n\r\n",
            b"",
        );
        let (response, echo) = handle(&h, req).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(echo.protocol, "HTTP/1.1");
        assert_eq!(echo.host, "example.com");
        assert_eq!(echo.message, "hello test");
        assert_eq!(echo.request_line, "GET /test");
        assert_eq!(echo.headers["X-Test-Header"], "test-value");
        assert!(!echo.headers.contains_key("Host"));
        assert_eq!(echo.remote_address, REMOTE);
        assert!(echo.body.is_empty());
    }

    #[tokio::test]
    async fn test_post_request_with_body() {
        let h = handler("hello post");
        let req = request(
            "POST /api/data HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 16\r\n\r\n",
            br#"{"key": "value"}"#,
        );
        let (response, echo) = handle(&h, req).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(echo.message, "hello post");
        assert_eq!(echo.request_line, "POST /api/data");
        assert_eq!(echo.headers["Content-Type"], "application/json");
        assert_eq!(echo.body, r#"{"key": "value"}"#);
        assert_eq!(echo.content_length, 16);
    }

    #[tokio::test]
    async fn test_query_string_is_kept_raw() {
        let h = handler("q");
        let req = request("DELETE /items/7?force=true&x=%20 HTTP/1.1\r\n\r\n", b"");
        let (_, echo) = handle(&h, req).await;
        assert_eq!(echo.request_line, "DELETE /items/7?force=true&x=%20");
    }

    #[tokio::test]
    async fn test_single_header_with_commas() {
        let h = handler("test headers");
        let req = request(
            "GET /headers HTTP/1.1\r\nAccept: application/json, text/plain\r\n\r\n",
            b"",
        );
        let (_, echo) = handle(&h, req).await;
        assert_eq!(echo.headers["Accept"], "application/json, text/plain");
    }

    #[tokio::test]
    async fn test_repeated_headers_are_joined_in_order() {
        let h = handler("multi");
        let req = request(
            "GET / HTTP/1.1\r\nX-Trace: first\r\nAccept: */*\r\nx-trace: second\r\nX-TRACE: third\r\n\r\n",
            b"",
        );
        let (_, echo) = handle(&h, req).await;
        assert_eq!(echo.headers["X-Trace"], "first; second; third");
        assert_eq!(echo.headers["Accept"], "*/*");
        assert_eq!(echo.headers.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_body() {
        let h = handler("empty body");
        let req = request("PUT /empty HTTP/1.1\r\n\r\n", b"");
        let (_, echo) = handle(&h, req).await;
        assert!(echo.body.is_empty());
        assert_eq!(echo.content_length, 0);
    }

    #[tokio::test]
    async fn test_content_length_counts_bytes_read() {
        let h = handler("declared");
        // The declared length is ignored; only what was read counts
        let req = request("POST / HTTP/1.1\r\nContent-Length: 999\r\n\r\n", b"12345");
        let (_, echo) = handle(&h, req).await;
        assert_eq!(echo.content_length, 5);
        assert_eq!(echo.headers["Content-Length"], "999");
    }

    #[tokio::test]
    async fn test_http10_protocol() {
        let h = handler("old");
        let req = request("GET / HTTP/1.0\r\n\r\n", b"");
        let (_, echo) = handle(&h, req).await;
        assert_eq!(echo.protocol, "HTTP/1.0");
        assert_eq!(echo.host, "");
    }

    #[tokio::test]
    async fn test_invalid_utf8_body_is_replaced() {
        let h = handler("bytes");
        let req = request("POST / HTTP/1.1\r\n\r\n", b"ok\xff");
        let (_, echo) = handle(&h, req).await;
        assert_eq!(echo.body, "ok\u{FFFD}");
        assert_eq!(echo.content_length, 3);
    }

    #[tokio::test]
    async fn test_body_read_error_returns_500() {
        let h = handler("test");
        let body = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected EOF"))
            .build();
        let req = Request::new(
            head("POST /test HTTP/1.1\r\n\r\n"),
            REMOTE.parse().unwrap(),
            body,
        );

        let response = h.handle(req).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(response.body(), &Bytes::from_static(b"unexpected EOF\n"));
        assert!(serde_json::from_slice::<EchoResponse>(response.body()).is_err());
    }

    #[tokio::test]
    async fn test_large_body() {
        let large: &'static [u8] = Box::leak(vec![b'a'; 1 << 20].into_boxed_slice());
        let h = handler("test");
        let req = request("POST /test HTTP/1.1\r\n\r\n", large);
        let (response, echo) = handle(&h, req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(echo.body.len(), 1 << 20);
        assert!(echo.body.bytes().all(|b| b == b'a'));
        assert_eq!(echo.content_length, 1 << 20);
    }

    #[tokio::test]
    async fn test_concurrent_requests() {
        let h = Arc::new(handler("test"));
        let mut handles = Vec::new();

        for i in 0..10 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                let raw_head = format!("POST /test{i} HTTP/1.1\r\n\r\n");
                let body = format!("body {i}").into_bytes();
                let req = Request::new(head(&raw_head), REMOTE.parse().unwrap(), &body[..]);
                let response = h.handle(req).await;
                assert_eq!(response.status(), StatusCode::OK);
                let echo: EchoResponse = serde_json::from_slice(response.body()).unwrap();
                (i, echo)
            }));
        }

        for handle in handles {
            let (i, echo) = handle.await.unwrap();
            assert_eq!(echo.message, "test");
            assert_eq!(echo.request_line, format!("POST /test{i}"));
            assert_eq!(echo.body, format!("body {i}"));
        }
    }

    #[test]
    fn test_json_layout() {
        let echo = EchoResponse {
            protocol: "HTTP/1.1".to_string(),
            host: "h".to_string(),
            request_line: "GET /".to_string(),
            headers: BTreeMap::from([("Accept".to_string(), "*/*".to_string())]),
            message: "m".to_string(),
            body: String::new(),
            remote_address: REMOTE.to_string(),
            content_length: 0,
        };
        let json = echo.to_json().unwrap();
        let expected = "{\n \"proto\": \"HTTP/1.1\",\n \"host\": \"h\",\n \"request\": \"GET /\",\n \"headers\": {\n  \"Accept\": \"*/*\"\n },\n \"message\": \"m\",\n \"body\": \"\",\n \"remote_addr\": \"192.0.2.1:1234\",\n \"content_length\": 0\n}";
        assert_eq!(std::str::from_utf8(&json).unwrap(), expected);
    }
}
