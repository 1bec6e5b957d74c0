use super::codec::ProtocolError;
use http::header::{CONNECTION, CONTENT_LENGTH, EXPECT, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version};
use std::net::SocketAddr;
use tokio::io::AsyncRead;

/// Largest request head accepted, in bytes
pub const MAX_HEAD_BYTES: usize = 64 * 1024;
/// Largest number of header lines accepted
pub const MAX_HEADERS: usize = 100;

/// How the body following a request head is framed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body at all
    Empty,
    /// Exactly this many bytes follow
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
}

/// Parsed request line and headers
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Request target exactly as sent (path and query, or absolute URI)
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    /// Parses a request head from the start of `buf`.
    ///
    /// Returns `Ok(None)` while the head is incomplete, otherwise the head and
    /// the number of bytes it occupied.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let parsed_len = match req.parse(buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_HEAD_BYTES {
                    return Err(ProtocolError::HeadTooLarge);
                }
                return Ok(None);
            }
            Err(httparse::Error::TooManyHeaders) => return Err(ProtocolError::HeadTooLarge),
            Err(e) => return Err(ProtocolError::Malformed(e)),
        };
        if parsed_len > MAX_HEAD_BYTES {
            return Err(ProtocolError::HeadTooLarge);
        }

        // A complete parse always fills method, path and version
        let method = req.method.ok_or(ProtocolError::Malformed(httparse::Error::Token))?;
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ProtocolError::Malformed(httparse::Error::Token))?;
        let target = req
            .path
            .ok_or(ProtocolError::Malformed(httparse::Error::Token))?
            .to_string();
        let version = match req.version {
            Some(0) => Version::HTTP_10,
            _ => Version::HTTP_11,
        };

        let mut header_map = HeaderMap::with_capacity(req.headers.len());
        for header in req.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|_| ProtocolError::Malformed(httparse::Error::HeaderName))?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|_| ProtocolError::Malformed(httparse::Error::HeaderValue))?;
            header_map.append(name, value);
        }

        Ok(Some((
            Self {
                method,
                target,
                version,
                headers: header_map,
            },
            parsed_len,
        )))
    }

    /// Protocol string as it appeared on the request line
    pub fn protocol(&self) -> &'static str {
        if self.version == Version::HTTP_10 {
            "HTTP/1.0"
        } else {
            "HTTP/1.1"
        }
    }

    /// Target host: the authority of an absolute-form or authority-form
    /// target (`CONNECT example.com:443`), else the `Host` header, else empty
    pub fn host(&self) -> String {
        let authority_form = !self.target.starts_with('/') && self.target != "*";
        if let Ok(uri) = self.target.parse::<Uri>() {
            if let Some(authority) = uri.authority() {
                if uri.scheme().is_some() || authority_form {
                    // Strip any userinfo
                    let host = authority.as_str().rsplit('@').next().unwrap_or_default();
                    return host.to_string();
                }
            }
        }
        self.headers
            .get(HOST)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .unwrap_or_default()
    }

    /// Whether the connection may carry another request after this one
    pub fn keep_alive(&self) -> bool {
        let tokens = connection_tokens(&self.headers);
        if self.version == Version::HTTP_10 {
            tokens.iter().any(|t| t == "keep-alive")
        } else {
            !tokens.iter().any(|t| t == "close")
        }
    }

    /// Whether the client waits for `100 Continue` before sending the body
    pub fn expects_continue(&self) -> bool {
        self.version == Version::HTTP_11
            && self
                .headers
                .get(EXPECT)
                .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"100-continue"))
    }

    /// Determines body framing from `Transfer-Encoding` and `Content-Length`
    pub fn body_framing(&self) -> Result<BodyFraming, ProtocolError> {
        let codings: Vec<String> = self
            .headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .flat_map(|v| v.to_str().unwrap_or_default().split(','))
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        if let Some(last) = codings.last() {
            // Transfer-Encoding wins over Content-Length
            if last == "chunked" && codings.iter().filter(|c| *c == "chunked").count() == 1 {
                return Ok(BodyFraming::Chunked);
            }
            return Err(ProtocolError::UnsupportedTransferCoding(codings.join(", ")));
        }

        let mut length = None;
        for value in self.headers.get_all(CONTENT_LENGTH) {
            let parsed: u64 = value
                .to_str()
                .ok()
                .map(str::trim)
                .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|s| s.parse().ok())
                .ok_or(ProtocolError::InvalidContentLength)?;
            match length {
                Some(previous) if previous != parsed => {
                    return Err(ProtocolError::InvalidContentLength);
                }
                _ => length = Some(parsed),
            }
        }

        Ok(match length {
            Some(0) | None => BodyFraming::Empty,
            Some(n) => BodyFraming::Length(n),
        })
    }
}

fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .flat_map(|v| v.to_str().unwrap_or_default().split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .collect()
}

/// Canonical MIME form of a header name: `x-test-header` -> `X-Test-Header`
pub fn canonical_header_name(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

/// Request body as an async byte stream
pub type Body<'a> = Box<dyn AsyncRead + Send + Unpin + 'a>;

/// An inbound request as seen by a handler
pub struct Request<'a> {
    pub head: RequestHead,
    pub remote_addr: SocketAddr,
    pub body: Body<'a>,
}

impl<'a> Request<'a> {
    pub fn new<B>(head: RequestHead, remote_addr: SocketAddr, body: B) -> Self
    where
        B: AsyncRead + Send + Unpin + 'a,
    {
        Self {
            head,
            remote_addr,
            body: Box::new(body),
        }
    }
}
