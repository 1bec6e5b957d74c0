//! HTTP/1.x framing for a single connection
//!
//! [`HttpCodec`] turns the inbound byte stream into a sequence of
//! [`Frame`]s: one `Head`, then zero or more `Body` chunks, then
//! `EndOfBody`, repeated for every request on the connection. The same
//! codec encodes responses.

use super::request::{BodyFraming, RequestHead};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::header::CONTENT_LENGTH;
use http::{Method, Response, StatusCode, Version};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Longest chunk-size or trailer line accepted
const MAX_CHUNK_LINE: usize = 4096;

/// Errors produced while decoding a request
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed request: {0}")]
    Malformed(httparse::Error),
    #[error("request header fields too large")]
    HeadTooLarge,
    #[error("invalid Content-Length header")]
    InvalidContentLength,
    #[error("unsupported transfer coding: {0}")]
    UnsupportedTransferCoding(String),
    #[error("invalid chunked body encoding")]
    InvalidChunk,
    #[error("connection closed before the request head was complete")]
    IncompleteHead,
}

impl ProtocolError {
    /// Status to answer with, or `None` when the peer cannot be answered
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProtocolError::Malformed(_)
            | ProtocolError::InvalidContentLength
            | ProtocolError::InvalidChunk => Some(StatusCode::BAD_REQUEST),
            ProtocolError::HeadTooLarge => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            ProtocolError::UnsupportedTransferCoding(_) => Some(StatusCode::NOT_IMPLEMENTED),
            ProtocolError::Io(_) | ProtocolError::IncompleteHead => None,
        }
    }
}

impl From<ProtocolError> for io::Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// One decoded unit of an inbound request
#[derive(Debug)]
pub enum Frame {
    Head(RequestHead),
    Body(Bytes),
    EndOfBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Head,
    Fixed(u64),
    Chunked(ChunkState),
}

/// Request decoder and response encoder for one connection
#[derive(Debug)]
pub struct HttpCodec {
    state: DecodeState,
    /// The request being answered is HEAD: responses keep their
    /// `content-length` but carry no body
    head_request: bool,
}

impl HttpCodec {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Head,
            head_request: false,
        }
    }

    /// Marks the current body finished if nothing of it is left unread.
    ///
    /// Returns `false` when body bytes are still pending; the connection
    /// then cannot be reused for another request.
    pub fn finish_body(&mut self) -> bool {
        match self.state {
            DecodeState::Head => true,
            DecodeState::Fixed(0) => {
                self.state = DecodeState::Head;
                true
            }
            _ => false,
        }
    }

    fn decode_chunked(
        &mut self,
        mut chunk: ChunkState,
        src: &mut BytesMut,
    ) -> Result<Option<Frame>, ProtocolError> {
        loop {
            match chunk {
                ChunkState::Size => {
                    let Some(line) = take_line(src)? else {
                        self.state = DecodeState::Chunked(chunk);
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&line)?;
                    chunk = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    if src.is_empty() {
                        self.state = DecodeState::Chunked(chunk);
                        return Ok(None);
                    }
                    let n = remaining.min(src.len() as u64) as usize;
                    let data = src.split_to(n).freeze();
                    let left = remaining - n as u64;
                    self.state = DecodeState::Chunked(if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    });
                    return Ok(Some(Frame::Body(data)));
                }
                ChunkState::DataEnd => {
                    if src.starts_with(b"\r\n") {
                        src.advance(2);
                    } else if src.starts_with(b"\n") {
                        src.advance(1);
                    } else if src.len() < 2 {
                        self.state = DecodeState::Chunked(chunk);
                        return Ok(None);
                    } else {
                        return Err(ProtocolError::InvalidChunk);
                    }
                    chunk = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(line) = take_line(src)? else {
                        self.state = DecodeState::Chunked(chunk);
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = DecodeState::Head;
                        return Ok(Some(Frame::EndOfBody));
                    }
                }
            }
        }
    }
}

impl Default for HttpCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits one line off `src`, without its line ending
fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ProtocolError> {
    match src.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            let mut line = src.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            Ok(Some(line))
        }
        None if src.len() > MAX_CHUNK_LINE => Err(ProtocolError::InvalidChunk),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ProtocolError> {
    // Chunk extensions after ';' are ignored
    let size = line.split(|&b| b == b';').next().unwrap_or_default();
    let size = std::str::from_utf8(size)
        .map_err(|_| ProtocolError::InvalidChunk)?
        .trim();
    if size.is_empty() {
        return Err(ProtocolError::InvalidChunk);
    }
    u64::from_str_radix(size, 16).map_err(|_| ProtocolError::InvalidChunk)
}

impl Decoder for HttpCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        match self.state {
            DecodeState::Head => {
                if src.is_empty() {
                    return Ok(None);
                }
                self.head_request = false;
                let Some((head, len)) = RequestHead::parse(&src[..])? else {
                    return Ok(None);
                };
                let framing = head.body_framing()?;
                src.advance(len);
                self.head_request = head.method == Method::HEAD;
                self.state = match framing {
                    BodyFraming::Empty => DecodeState::Fixed(0),
                    BodyFraming::Length(n) => DecodeState::Fixed(n),
                    BodyFraming::Chunked => DecodeState::Chunked(ChunkState::Size),
                };
                Ok(Some(Frame::Head(head)))
            }
            DecodeState::Fixed(0) => {
                self.state = DecodeState::Head;
                Ok(Some(Frame::EndOfBody))
            }
            DecodeState::Fixed(remaining) => {
                if src.is_empty() {
                    return Ok(None);
                }
                let n = remaining.min(src.len() as u64) as usize;
                self.state = DecodeState::Fixed(remaining - n as u64);
                Ok(Some(Frame::Body(src.split_to(n).freeze())))
            }
            DecodeState::Chunked(chunk) => self.decode_chunked(chunk, src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        match self.state {
            DecodeState::Head if src.is_empty() => Ok(None),
            DecodeState::Head => Err(ProtocolError::IncompleteHead),
            _ => Err(ProtocolError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected EOF",
            ))),
        }
    }
}

impl Encoder<Response<Bytes>> for HttpCodec {
    type Error = io::Error;

    fn encode(&mut self, response: Response<Bytes>, dst: &mut BytesMut) -> io::Result<()> {
        let status = response.status();
        let version = if response.version() == Version::HTTP_10 {
            "HTTP/1.0"
        } else {
            "HTTP/1.1"
        };
        let body = response.body();

        dst.reserve(128 + body.len());
        dst.put_slice(version.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(status.as_str().as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
        dst.put_slice(b"\r\n");

        for (name, value) in response.headers() {
            if name == CONTENT_LENGTH {
                continue;
            }
            dst.put_slice(name.as_str().as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        if !status.is_informational() {
            dst.put_slice(format!("content-length: {}\r\n", body.len()).as_bytes());
        }
        dst.put_slice(b"\r\n");
        if !self.head_request {
            dst.put_slice(body);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    fn decode_all(codec: &mut HttpCodec, src: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(src).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn body_of(frames: &[Frame]) -> Vec<u8> {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::Body(b) => Some(b.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_content_length_body() {
        let mut codec = HttpCodec::new();
        let mut src = BytesMut::from(
            "POST /api/data HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello",
        );
        let frames = decode_all(&mut codec, &mut src);
        assert!(matches!(frames[0], Frame::Head(ref h) if h.target == "/api/data"));
        assert_eq!(body_of(&frames), b"hello");
        assert!(matches!(frames.last(), Some(Frame::EndOfBody)));
        assert!(codec.finish_body());
    }

    #[test]
    fn test_body_split_across_reads() {
        let mut codec = HttpCodec::new();
        let mut src = BytesMut::from("PUT / HTTP/1.1\r\nContent-Length: 6\r\n\r\nabc");
        let frames = decode_all(&mut codec, &mut src);
        assert_eq!(body_of(&frames), b"abc");
        assert!(!frames.iter().any(|f| matches!(f, Frame::EndOfBody)));
        assert!(!codec.finish_body());

        src.extend_from_slice(b"def");
        let frames = decode_all(&mut codec, &mut src);
        assert_eq!(body_of(&frames), b"def");
        assert!(matches!(frames.last(), Some(Frame::EndOfBody)));
    }

    #[test]
    fn test_empty_body_ends_immediately() {
        let mut codec = HttpCodec::new();
        let mut src = BytesMut::from("GET / HTTP/1.1\r\n\r\n");
        let frames = decode_all(&mut codec, &mut src);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], Frame::EndOfBody));
    }

    #[test]
    fn test_unread_empty_body_can_be_finished() {
        let mut codec = HttpCodec::new();
        let mut src = BytesMut::from("GET / HTTP/1.1\r\n\r\nGET /next HTTP/1.1\r\n\r\n");
        assert!(matches!(codec.decode(&mut src).unwrap(), Some(Frame::Head(_))));
        assert!(codec.finish_body());
        // The next frame is the pipelined request, not a stray end marker
        assert!(matches!(codec.decode(&mut src).unwrap(), Some(Frame::Head(ref h)) if h.target == "/next"));
    }

    #[test]
    fn test_chunked_body() {
        let mut codec = HttpCodec::new();
        let mut src = BytesMut::from(
            "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nX-Trailer: t\r\n\r\n",
        );
        let frames = decode_all(&mut codec, &mut src);
        assert_eq!(body_of(&frames), b"Wikipedia");
        assert!(matches!(frames.last(), Some(Frame::EndOfBody)));
        assert!(src.is_empty());
        assert!(codec.finish_body());
    }

    #[test]
    fn test_chunked_body_byte_by_byte() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\na\r\n0123456789\r\n0\r\n\r\n";
        let mut codec = HttpCodec::new();
        let mut src = BytesMut::new();
        let mut frames = Vec::new();
        for &b in raw.iter() {
            src.put_u8(b);
            frames.extend(decode_all(&mut codec, &mut src));
        }
        assert_eq!(body_of(&frames), b"0123456789");
        assert!(matches!(frames.last(), Some(Frame::EndOfBody)));
    }

    #[test]
    fn test_invalid_chunk_size() {
        let mut codec = HttpCodec::new();
        let mut src = BytesMut::from("POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n");
        assert!(matches!(codec.decode(&mut src).unwrap(), Some(Frame::Head(_))));
        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidChunk));
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_eof_inside_body_is_error() {
        let mut codec = HttpCodec::new();
        let mut src = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc");
        let _ = decode_all(&mut codec, &mut src);
        let err = codec.decode_eof(&mut src).unwrap_err();
        assert!(matches!(err, ProtocolError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_eof_between_requests_is_clean() {
        let mut codec = HttpCodec::new();
        let mut src = BytesMut::new();
        assert!(codec.decode_eof(&mut src).unwrap().is_none());

        let mut src = BytesMut::from("GET / HT");
        assert!(matches!(codec.decode_eof(&mut src), Err(ProtocolError::IncompleteHead)));
    }

    #[test]
    fn test_unsupported_transfer_coding_status() {
        let mut codec = HttpCodec::new();
        let mut src = BytesMut::from("POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n");
        let err = codec.decode(&mut src).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_IMPLEMENTED));
    }

    #[test]
    fn test_encode_response() {
        let mut codec = HttpCodec::new();
        let mut response = Response::new(Bytes::from_static(b"{}"));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, "application/json".parse().unwrap());
        // A stale length header is replaced by the real one
        response
            .headers_mut()
            .insert(CONTENT_LENGTH, "999".parse().unwrap());

        let mut dst = BytesMut::new();
        codec.encode(response, &mut dst).unwrap();
        assert_eq!(
            &dst[..],
            b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 2\r\n\r\n{}"
        );
    }

    #[test]
    fn test_head_response_has_length_but_no_body() {
        let mut codec = HttpCodec::new();
        let mut src = BytesMut::from("HEAD /x HTTP/1.1\r\n\r\nGET /y HTTP/1.1\r\n\r\n");
        let _ = codec.decode(&mut src).unwrap();
        assert!(codec.finish_body());

        let mut dst = BytesMut::new();
        codec.encode(Response::new(Bytes::from_static(b"{}")), &mut dst).unwrap();
        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\n");

        // The following GET gets its body again
        let _ = codec.decode(&mut src).unwrap();
        let mut dst = BytesMut::new();
        codec.encode(Response::new(Bytes::from_static(b"{}")), &mut dst).unwrap();
        assert!(dst.ends_with(b"\r\n\r\n{}"));
    }

    #[test]
    fn test_encode_continue_and_http10() {
        let mut codec = HttpCodec::new();
        let mut response = Response::new(Bytes::new());
        *response.status_mut() = StatusCode::CONTINUE;
        let mut dst = BytesMut::new();
        codec.encode(response, &mut dst).unwrap();
        assert_eq!(&dst[..], b"HTTP/1.1 100 Continue\r\n\r\n");

        let mut response = Response::new(Bytes::from_static(b"x"));
        *response.version_mut() = Version::HTTP_10;
        let mut dst = BytesMut::new();
        codec.encode(response, &mut dst).unwrap();
        assert!(dst.starts_with(b"HTTP/1.0 200 OK\r\n"));
    }
}
