//! [`StreamConn`]: a single virtual byte-stream endpoint backed by one `quinn` bidirectional
//! stream, annotated with the [`ClientInfo`] of the QUIC session it came from.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use quinn::{RecvStream, SendStream};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use vnet_proto::ClientInfo;

use crate::transport::with_deadline;

#[derive(Default)]
struct Deadlines {
    read: Option<Duration>,
    write: Option<Duration>,
}

/// One virtual byte-stream connection: a `quinn` stream pair plus the addresses and
/// [`ClientInfo`] of the session it was opened on.
///
/// Implements [`AsyncRead`]/[`AsyncWrite`] directly against the underlying stream for the data
/// phase (no deadline applied, matching how a plain TCP socket behaves once handed to
/// `tokio::io::copy`). The handshake code instead uses [`StreamConn::read_with_deadline`]/
/// [`StreamConn::write_with_deadline`], which honor whatever deadline was last set.
pub struct StreamConn {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    info: Arc<ClientInfo>,
    send: SendStream,
    recv: RecvStream,
    deadlines: Mutex<Deadlines>,
}

impl StreamConn {
    pub fn new(local_addr: SocketAddr, remote_addr: SocketAddr, info: Arc<ClientInfo>, send: SendStream, recv: RecvStream) -> Self {
        Self { local_addr, remote_addr, info, send, recv, deadlines: Mutex::new(Deadlines::default()) }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn client_info(&self) -> &Arc<ClientInfo> {
        &self.info
    }

    /// Sets both the read and write deadline for subsequent `*_with_deadline` calls.
    pub fn set_deadline(&self, deadline: Option<Duration>) {
        let mut d = self.deadlines.lock().expect("deadlines mutex poisoned");
        d.read = deadline;
        d.write = deadline;
    }

    pub fn set_read_deadline(&self, deadline: Option<Duration>) {
        self.deadlines.lock().expect("deadlines mutex poisoned").read = deadline;
    }

    pub fn set_write_deadline(&self, deadline: Option<Duration>) {
        self.deadlines.lock().expect("deadlines mutex poisoned").write = deadline;
    }

    fn read_deadline(&self) -> Option<Duration> {
        self.deadlines.lock().expect("deadlines mutex poisoned").read
    }

    fn write_deadline(&self) -> Option<Duration> {
        self.deadlines.lock().expect("deadlines mutex poisoned").write
    }

    /// Reads into `buf`, honoring the currently-set read deadline, if any.
    pub async fn read_with_deadline(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_deadline() {
            Some(deadline) => with_deadline(deadline, AsyncReadExt::read(&mut self.recv, buf)).await,
            None => AsyncReadExt::read(&mut self.recv, buf).await,
        }
    }

    /// Writes all of `buf`, honoring the currently-set write deadline, if any.
    pub async fn write_with_deadline(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.write_deadline() {
            Some(deadline) => with_deadline(deadline, self.send.write_all(buf)).await,
            None => self.send.write_all(buf).await,
        }
    }

    /// Closes the send half; idempotent at the `quinn` stream level, but callers must not race
    /// this with a concurrent read or write.
    pub async fn close(&mut self) -> io::Result<()> {
        self.send.finish().await
    }
}

impl AsyncRead for StreamConn {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.recv).poll_read(cx, buf)
    }
}

impl AsyncWrite for StreamConn {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.send).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.send).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.send).poll_shutdown(cx)
    }
}

/// Recovers the [`ClientInfo`] of a `StreamConn` that's known to be one, the published lookup
/// an upper-layer protocol uses to identify the originating client of an inbound byte stream.
pub fn from_conn(conn: &StreamConn) -> Arc<ClientInfo> {
    Arc::clone(&conn.info)
}

/// Pairs a value with the [`ClientInfo`] of the `StreamConn` it was produced from. Rust has no
/// ambient request-context type equivalent to Go's `context.Context`, so a host protocol
/// implementation carries the descriptor alongside its own per-request context type with this
/// adapter instead of through a dynamic context lookup.
pub struct WithClientInfo<T> {
    pub info: Arc<ClientInfo>,
    pub value: T,
}

impl<T> WithClientInfo<T> {
    pub fn new(conn: &StreamConn, value: T) -> Self {
        Self { info: from_conn(conn), value }
    }
}
