//! Accept-loop driver: owns a set of QUIC endpoints, applies bounded backoff to transient accept
//! errors, and hands each accepted connection off to a [`ConnectionHandler`]. Grounded in the
//! teacher's `server/run.rs::run_server`, generalized from one inlined handler function to a
//! trait object so the driver is reusable outside this crate's own demo binary.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use quinn::{Connection, Endpoint, VarInt};

use crate::backoff::Backoff;
use crate::error::{err_server_closed, VnetOpError};
use crate::transport::is_transient;

/// Hands off an accepted QUIC connection for per-session processing. Implemented by
/// [`crate::mux::StreamMux`]. Boxes its future rather than using an `async fn` directly, since a
/// `dyn ConnectionHandler` trait object can't otherwise be built from an async trait method.
pub trait ConnectionHandler: Send + Sync {
    fn handle(&self, connection: Connection) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
}

struct ServerInner {
    handler: Arc<dyn ConnectionHandler>,
    endpoints: Mutex<Vec<Endpoint>>,
    closed: AtomicBool,
}

/// Drives the accept loop of one or more QUIC endpoints, dispatching each accepted connection to
/// the configured handler. `close()` is close-once and tears down every registered endpoint.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(handler: Arc<dyn ConnectionHandler>) -> Self {
        Self { inner: Arc::new(ServerInner { handler, endpoints: Mutex::new(Vec::new()), closed: AtomicBool::new(false) }) }
    }

    /// Registers `endpoint` as a closer and runs its accept loop until the endpoint stops
    /// producing connections (because it was closed, by this call or by `close()`).
    pub async fn serve(&self, endpoint: Endpoint) -> Result<(), VnetOpError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(err_server_closed());
        }
        self.inner.endpoints.lock().expect("endpoints lock poisoned").push(endpoint.clone());

        let local_addr = endpoint.local_addr().map(|addr| addr.to_string()).unwrap_or_else(|_| "?".to_owned());
        println!("vnet: serving on {local_addr}");

        let mut backoff = Backoff::new();
        loop {
            let incoming = match endpoint.accept().await {
                Some(incoming) => incoming,
                None => break,
            };

            let remote = incoming.remote_address();
            match incoming.await {
                Ok(connection) => {
                    backoff.reset();
                    println!("vnet: accepted connection from {remote}");
                    let handler = Arc::clone(&self.inner.handler);
                    tokio::spawn(async move {
                        handler.handle(connection).await;
                    });
                }
                Err(error) if is_transient(&error) => {
                    let delay = backoff.next_delay();
                    println!("vnet: transient error accepting connection from {remote}, retrying in {delay:?}: {error}");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    println!("vnet: fatal error accepting connection from {remote}: {error}");
                    break;
                }
            }
        }

        println!("vnet: accept loop on {local_addr} ended");
        if self.inner.closed.load(Ordering::Acquire) {
            Err(err_server_closed())
        } else {
            Ok(())
        }
    }

    /// Close-once: closes every endpoint registered via `serve()` exactly once, which in turn
    /// unblocks each endpoint's accept loop with a `None`.
    pub fn close(&self) -> Result<(), VnetOpError> {
        if self.inner.closed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(err_server_closed());
        }

        let endpoints = self.inner.endpoints.lock().expect("endpoints lock poisoned");
        for endpoint in endpoints.iter() {
            endpoint.close(VarInt::from_u32(0), b"server closed");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::make_server_endpoint;

    struct NoopHandler;

    impl ConnectionHandler for NoopHandler {
        fn handle(&self, _connection: Connection) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
            Box::pin(async {})
        }
    }

    #[test]
    fn second_close_is_server_closed() {
        let server = Server::new(Arc::new(NoopHandler));
        server.close().unwrap();
        assert!(server.close().is_err());
    }

    #[tokio::test]
    async fn serve_after_close_is_server_closed() {
        let server = Server::new(Arc::new(NoopHandler));
        server.close().unwrap();

        let (endpoint, _cert_der) = make_server_endpoint("127.0.0.1:0".parse().unwrap()).unwrap();
        let err = server.serve(endpoint).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn close_during_serve_ends_the_accept_loop() {
        let server = Server::new(Arc::new(NoopHandler));
        let (endpoint, _cert_der) = make_server_endpoint("127.0.0.1:0".parse().unwrap()).unwrap();

        let serve_server = server.clone();
        let serve_task = tokio::spawn(async move { serve_server.serve(endpoint).await });

        tokio::task::yield_now().await;
        server.close().unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), serve_task).await;
        assert!(result.unwrap().unwrap().unwrap_err().is_closed());
    }
}
