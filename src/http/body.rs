use super::codec::{Frame, HttpCodec};
use bytes::Bytes;
use futures::Stream;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Sleep;
use tokio_util::codec::Framed;
use tokio_util::io::StreamReader;

/// Body frames of the request currently being read from a connection
///
/// Yields `Body` chunks until `EndOfBody`. A connection that closes early,
/// a framing error or an expired deadline surface as an `io::Error`.
pub struct BodyStream<'a, T> {
    framed: &'a mut Framed<T, HttpCodec>,
    deadline: Pin<Box<Sleep>>,
    timeout: Duration,
    done: bool,
}

impl<'a, T> BodyStream<'a, T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Starts reading a body; the whole body must arrive within `timeout`
    pub fn new(framed: &'a mut Framed<T, HttpCodec>, timeout: Duration) -> Self {
        Self {
            framed,
            deadline: Box::pin(tokio::time::sleep(timeout)),
            timeout,
            done: false,
        }
    }

    /// Wraps the stream as an `AsyncRead` for handlers
    pub fn into_reader(self) -> StreamReader<Self, Bytes> {
        StreamReader::new(self)
    }
}

impl<T> Stream for BodyStream<'_, T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut *this.framed).poll_next(cx) {
            Poll::Ready(Some(Ok(Frame::Body(chunk)))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Ok(Frame::EndOfBody))) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(Frame::Head(_)))) => {
                this.done = true;
                Poll::Ready(Some(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "request head received while reading a body",
                ))))
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(Some(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected EOF",
                ))))
            }
            Poll::Pending => match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    this.done = true;
                    Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("timed out reading body after {:?}", this.timeout),
                    ))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
