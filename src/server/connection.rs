use crate::handler::RequestHandler;
use crate::http::{BodyStream, Frame, HttpCodec, ProtocolError, Request, response};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::header::{CONNECTION, HeaderValue};
use http::{Response, Version};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Serves the requests of one accepted connection, one at a time
pub struct Connection<T> {
    framed: Framed<T, HttpCodec>,
    remote_addr: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        io: T,
        remote_addr: SocketAddr,
        handler: Arc<dyn RequestHandler>,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            framed: Framed::new(io, HttpCodec::new()),
            remote_addr,
            handler,
            timeout,
            shutdown,
        }
    }

    /// Runs until the peer closes, an error occurs, a timeout expires, or
    /// shutdown is requested while the connection is idle.
    pub async fn serve(mut self) -> Result<(), ProtocolError> {
        loop {
            let idle = self.framed.read_buffer().is_empty();
            let frame = tokio::select! {
                biased;
                _ = self.shutdown.cancelled(), if idle => {
                    debug!("Closing idle connection for shutdown");
                    return Ok(());
                }
                frame = timeout(self.timeout, self.framed.next()) => frame,
            };

            let head = match frame {
                Err(_) => {
                    debug!("Connection timed out waiting for a request");
                    return Ok(());
                }
                Ok(None) => {
                    debug!("Client closed connection");
                    return Ok(());
                }
                Ok(Some(Ok(Frame::Head(head)))) => head,
                Ok(Some(Ok(_))) => {
                    return Err(ProtocolError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "body frame received before a request head",
                    )));
                }
                Ok(Some(Err(e))) => {
                    self.reject(&e).await;
                    return Err(e);
                }
            };

            let version = head.version;
            let wants_keep_alive = head.keep_alive();
            info!(method = %head.method, target = %head.target, "Request received");

            if head.expects_continue() {
                self.send(response::continue_100()).await?;
            }

            let body = BodyStream::new(&mut self.framed, self.timeout).into_reader();
            let request = Request::new(head, self.remote_addr, body);
            let mut response = self.handler.handle(request).await;

            let body_finished = self.framed.codec_mut().finish_body();
            let keep_alive = wants_keep_alive && body_finished && !self.shutdown.is_cancelled();

            *response.version_mut() = version;
            if !keep_alive {
                response
                    .headers_mut()
                    .insert(CONNECTION, HeaderValue::from_static("close"));
            } else if version == Version::HTTP_10 {
                response
                    .headers_mut()
                    .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            }

            let status = response.status();
            self.send(response).await?;
            debug!(status = status.as_u16(), keep_alive, "Response sent");

            if !keep_alive {
                return Ok(());
            }
        }
    }

    async fn send(&mut self, response: Response<Bytes>) -> Result<(), ProtocolError> {
        match timeout(self.timeout, self.framed.send(response)).await {
            Ok(result) => result.map_err(ProtocolError::Io),
            Err(_) => Err(ProtocolError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "timed out writing response",
            ))),
        }
    }

    /// Answers a request that could not be decoded, when it can be answered
    async fn reject(&mut self, err: &ProtocolError) {
        let Some(status) = err.status() else {
            return;
        };
        let mut response = response::plain_error(status, err);
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
        if let Err(e) = self.send(response).await {
            debug!(error = %e, "Failed to send error response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandlerOptions;
    use crate::handler::EchoHandler;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn echo_handler() -> Arc<dyn RequestHandler> {
        Arc::new(EchoHandler::new(&HandlerOptions::default()))
    }

    fn connection<T>(io: T, shutdown: CancellationToken) -> Connection<T>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        Connection::new(
            io,
            "127.0.0.1:5555".parse().unwrap(),
            echo_handler(),
            Duration::from_secs(5),
            shutdown,
        )
    }

    #[tokio::test]
    async fn test_request_with_connection_close() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(connection(server, CancellationToken::new()).serve());

        client
            .write_all(b"GET /once HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("connection: close\r\n"));
        assert!(text.contains("\"request\": \"GET /once\""));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_request_gets_400() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(connection(server, CancellationToken::new()).serve());

        client.write_all(b"GET / HTTP/9.9\r\n\r\n").await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(String::from_utf8_lossy(&out).starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(matches!(task.await.unwrap(), Err(ProtocolError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_http10_closes_after_response() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(connection(server, CancellationToken::new()).serve());

        client.write_all(b"GET /old HTTP/1.0\r\n\r\n").await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(text.contains("\"proto\": \"HTTP/1.0\""));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_idle_connection_closes_on_shutdown() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(connection(server, shutdown.clone()).serve());

        shutdown.cancel();
        task.await.unwrap().unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }
}
