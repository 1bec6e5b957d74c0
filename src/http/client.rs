use crate::handler::EchoResponse;
use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Minimal HTTP/1.1 client used to exercise the server from tests and benches
///
/// Requests are written as raw bytes so callers control every detail of the
/// wire format; responses are parsed with `httparse`.
///
/// # Examples
///
/// ```no_run
/// use dummyhttp::http::HttpClient;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut client = HttpClient::connect("127.0.0.1:8080".parse()?).await?;
///     let response = client
///         .send(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
///         .await?;
///     println!("{}", response.echo()?.request_line);
///     Ok(())
/// }
/// ```
pub struct HttpClient {
    stream: TcpStream,
    buffer: BytesMut,
    read_timeout: Duration,
}

/// A response read back from the server
#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ClientResponse {
    /// Decodes the body as an echo document
    pub fn echo(&self) -> serde_json::Result<EchoResponse> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl HttpClient {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(8192),
            read_timeout: Duration::from_secs(10),
        })
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Writes raw request bytes without waiting for a response
    pub async fn write(&mut self, raw: &[u8]) -> io::Result<()> {
        self.stream.write_all(raw).await?;
        self.stream.flush().await
    }

    /// Half-closes the connection so the server sees EOF
    pub async fn shutdown_write(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    /// Writes a raw request and reads one response
    pub async fn send(&mut self, raw: &[u8]) -> io::Result<ClientResponse> {
        self.write(raw).await?;
        self.read_response().await
    }

    /// Reads one complete response (status line, headers and sized body)
    pub async fn read_response(&mut self) -> io::Result<ClientResponse> {
        let (status, headers) = self.read_head().await?;

        let length = headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        while self.buffer.len() < length {
            self.fill().await?;
        }
        let body = self.buffer.split_to(length).freeze();

        Ok(ClientResponse {
            status,
            headers,
            body,
        })
    }

    /// Reads the answer to a HEAD request: a head whose `content-length`
    /// describes a body that is never sent
    pub async fn read_head_response(&mut self) -> io::Result<ClientResponse> {
        let (status, headers) = self.read_head().await?;
        Ok(ClientResponse {
            status,
            headers,
            body: Bytes::new(),
        })
    }

    async fn read_head(&mut self) -> io::Result<(StatusCode, HeaderMap)> {
        loop {
            if let Some(parsed) = self.parse_head()? {
                return Ok(parsed);
            }
            self.fill().await?;
        }
    }

    /// Returns true once the server has closed the connection
    pub async fn is_closed(&mut self) -> bool {
        matches!(
            timeout(self.read_timeout, self.stream.read_buf(&mut self.buffer)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }

    fn parse_head(&mut self) -> io::Result<Option<(StatusCode, HeaderMap)>> {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut response = httparse::Response::new(&mut headers);
        let len = match response.parse(&self.buffer) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        };

        let status = response
            .code
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid status code"))?;
        let mut map = HeaderMap::new();
        for header in response.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            map.append(name, value);
        }
        self.buffer.advance(len);
        Ok(Some((status, map)))
    }

    async fn fill(&mut self) -> io::Result<()> {
        let n = timeout(self.read_timeout, self.stream.read_buf(&mut self.buffer))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "response timeout"))??;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the response was complete",
            ));
        }
        Ok(())
    }
}
