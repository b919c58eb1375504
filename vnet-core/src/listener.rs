//! [`StreamListener`]: a per-virtual-port accept queue. Delivery from the multiplexer to the
//! listener's `accept()` caller is a rendezvous (unbuffered channel) so that backpressure on
//! inbound dials falls naturally out of nobody being ready to `accept()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;
use vnet_proto::VnetAddr;

use crate::conn::StreamConn;
use crate::error::{err_listener_closed, VnetOpError};
use crate::mux::StreamMuxInner;

pub(crate) struct ListenerShared {
    pub(crate) port: u16,
    addr: VnetAddr,
    sender: async_channel::Sender<StreamConn>,
    receiver: async_channel::Receiver<StreamConn>,
    closed: AtomicBool,
    cancel: CancellationToken,
    mux: Weak<StreamMuxInner>,
}

impl ListenerShared {
    pub(crate) fn new(port: u16, mux: Weak<StreamMuxInner>) -> Arc<Self> {
        // Capacity 0: `send` only completes once a concurrent `recv` is ready to take the value.
        let (sender, receiver) = async_channel::bounded(0);
        Arc::new(Self {
            port,
            addr: VnetAddr::new(port),
            sender,
            receiver,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            mux,
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Delivers `conn` to a waiting `accept()` caller. Called only by the multiplexer's stream
    /// dispatch. Fails immediately if the listener is already closed; otherwise blocks until
    /// either a consumer takes the connection or the listener is closed concurrently.
    pub(crate) async fn establish(&self, conn: StreamConn) -> Result<(), VnetOpError> {
        if self.is_closed() {
            return Err(err_listener_closed("establish", self.addr));
        }

        tokio::select! {
            biased;
            result = self.sender.send(conn) => result.map_err(|_| err_listener_closed("establish", self.addr)),
            () = self.cancel.cancelled() => Err(err_listener_closed("establish", self.addr)),
        }
    }
}

/// A per-virtual-port listener: from `StreamMux::listen(port)` until the first successful
/// `close()`.
pub struct StreamListener {
    pub(crate) shared: Arc<ListenerShared>,
}

impl StreamListener {
    pub(crate) fn new(shared: Arc<ListenerShared>) -> Self {
        Self { shared }
    }

    /// The local address of this listener; its port field is the virtual port.
    pub fn addr(&self) -> VnetAddr {
        self.shared.addr
    }

    /// Blocks until a new `StreamConn` is available or the listener is closed.
    pub async fn accept(&self) -> Result<StreamConn, VnetOpError> {
        tokio::select! {
            biased;
            result = self.shared.receiver.recv() => result.map_err(|_| err_listener_closed("accept", self.shared.addr)),
            () = self.shared.cancel.cancelled() => Err(err_listener_closed("accept", self.shared.addr)),
        }
    }

    /// Close-once: the first call trips the closed flag, cancels in-flight `establish` and
    /// `accept` waiters, and unregisters from the multiplexer. Later calls return
    /// `ListenerClosed`.
    pub fn close(&self) -> Result<(), VnetOpError> {
        if self.shared.closed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(err_listener_closed("close", self.shared.addr));
        }

        self.shared.cancel.cancel();
        if let Some(mux) = self.shared.mux.upgrade() {
            mux.unregister_listener(self.shared.port, &self.shared);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unrooted_listener(port: u16) -> StreamListener {
        StreamListener::new(ListenerShared::new(port, Weak::new()))
    }

    #[test]
    fn addr_reports_virtual_port() {
        let listener = unrooted_listener(8080);
        assert_eq!(listener.addr().port, 8080);
    }

    #[tokio::test]
    async fn accept_after_close_is_listener_closed() {
        let listener = unrooted_listener(80);
        listener.close().unwrap();
        let err = listener.accept().await.unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn second_close_is_listener_closed() {
        let listener = unrooted_listener(80);
        listener.close().unwrap();
        assert!(listener.close().unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn establish_after_close_fails() {
        let listener = unrooted_listener(80);
        listener.close().unwrap();

        let conn = crate::tests_support::loopback_stream_conn().await;
        let err = listener.shared.establish(conn).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn establish_rendezvous_with_accept() {
        let listener = unrooted_listener(80);
        let conn = crate::tests_support::loopback_stream_conn().await;

        let shared = Arc::clone(&listener.shared);
        let establish_task = tokio::spawn(async move { shared.establish(conn).await });

        let accepted = listener.accept().await.unwrap();
        assert_eq!(accepted.client_info().id, "loopback");
        establish_task.await.unwrap().unwrap();
    }
}
