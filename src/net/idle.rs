//! Per-connection progress deadlines.
//!
//! hyper only bounds the HTTP/1 request head. [`IdleTimeout`] wraps every
//! accepted stream so a read or a write that makes no progress for the idle
//! window fails with `TimedOut`, and the connection is dropped. This bounds
//! idle keep-alive connections as well as clients that stop reading a
//! response.

use std::future::{Future, Ready};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum_server::accept::Accept;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

/// Acceptor that puts an idle deadline on every connection.
#[derive(Debug, Clone, Copy)]
pub struct IdleTimeout {
    idle: Duration,
}

impl IdleTimeout {
    pub fn new(idle: Duration) -> Self {
        Self { idle }
    }
}

impl<I, S> Accept<I, S> for IdleTimeout
where
    I: AsyncRead + AsyncWrite + Unpin,
{
    type Stream = IdleStream<I>;
    type Service = S;
    type Future = Ready<io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        std::future::ready(Ok((IdleStream::new(stream, self.idle), service)))
    }
}

/// A stream whose pending reads and writes expire.
///
/// Each direction has its own timer. It is armed when an operation first
/// returns `Pending` and cleared as soon as one completes.
#[derive(Debug)]
pub struct IdleStream<I> {
    inner: I,
    idle: Duration,
    read_timer: Option<Pin<Box<Sleep>>>,
    write_timer: Option<Pin<Box<Sleep>>>,
}

impl<I> IdleStream<I> {
    pub fn new(inner: I, idle: Duration) -> Self {
        Self {
            inner,
            idle,
            read_timer: None,
            write_timer: None,
        }
    }

    pub fn get_ref(&self) -> &I {
        &self.inner
    }
}

/// Turn a pending operation into a `TimedOut` error once its timer fires.
fn expire<T>(
    timer: &mut Option<Pin<Box<Sleep>>>,
    idle: Duration,
    cx: &mut Context<'_>,
    direction: &str,
) -> Poll<io::Result<T>> {
    let sleep = timer.get_or_insert_with(|| Box::pin(tokio::time::sleep(idle)));
    match sleep.as_mut().poll(cx) {
        Poll::Ready(()) => {
            *timer = None;
            tracing::debug!(direction, idle_secs = idle.as_secs_f64(), "Connection idle, closing");
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} made no progress for {:?}", direction, idle),
            )))
        }
        Poll::Pending => Poll::Pending,
    }
}

impl<I: AsyncRead + Unpin> AsyncRead for IdleStream<I> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.read_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => expire(&mut this.read_timer, this.idle, cx, "read"),
        }
    }
}

impl<I: AsyncWrite + Unpin> AsyncWrite for IdleStream<I> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.write_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => expire(&mut this.write_timer, this.idle, cx, "write"),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(result) => {
                this.write_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => expire(&mut this.write_timer, this.idle, cx, "flush"),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
