//! Central multiplexer: per-connection handshake, virtual-port listener registry, per-stream
//! dispatch, and outbound dial-by-client-id. Grounded in the teacher's `server/run.rs` (accept
//! loop and per-connection/per-stream task shape) and `server/remote_tunnels.rs` (stream
//! dispatch), adapted from its `Rc`+`spawn_local` single-threaded style to `Arc`+`tokio::spawn`
//! since a reverse-tunnel server here must serve many independent client sessions concurrently
//! across worker threads rather than a single `LocalSet`.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use quinn::Connection;

use vnet_proto::{
    read_json_capped, split_dial_addr, write_json, ByteRead, ByteWrite, ClientInfo, DialErrno, DialStatus, HandshakeResult, U8ReprEnum,
    VnetAddr,
};

use crate::backoff::Backoff;
use crate::conn::StreamConn;
use crate::error::{VnetErr, VnetOpError};
use crate::listener::{ListenerShared, StreamListener};
use crate::server::ConnectionHandler;
use crate::transport::{is_transient, with_deadline};

const DEFAULT_STREAM_DEADLINE: Duration = Duration::from_secs(10);

struct InfoConn {
    connection: Connection,
    info: Arc<ClientInfo>,
}

pub(crate) struct StreamMuxInner {
    handshake_timeout: Option<Duration>,
    listeners: RwLock<HashMap<u16, Arc<ListenerShared>>>,
    connections: RwLock<HashMap<String, Arc<InfoConn>>>,
}

impl StreamMuxInner {
    /// Removes the listener registered at `port` only if it's still `shared` itself — a later
    /// listener may have reused the port after this one closed.
    pub(crate) fn unregister_listener(&self, port: u16, shared: &Arc<ListenerShared>) {
        let mut listeners = self.listeners.write().expect("listener registry lock poisoned");
        if listeners.get(&port).is_some_and(|existing| Arc::ptr_eq(existing, shared)) {
            listeners.remove(&port);
        }
    }
}

/// Registry of virtual-port listeners and per-client-id QUIC sessions; the protocol core that
/// both the server accept loop and outbound dialers talk to.
#[derive(Clone)]
pub struct StreamMux {
    inner: Arc<StreamMuxInner>,
}

impl StreamMux {
    /// `handshake_timeout` bounds the connection handshake (first-stream `ClientInfo` decode);
    /// `None` leaves it unbounded.
    pub fn new(handshake_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(StreamMuxInner {
                handshake_timeout,
                listeners: RwLock::new(HashMap::new()),
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registers a new listener on `port`. Fails with `PortInUse` if one is already registered.
    pub fn listen(&self, port: u16) -> Result<StreamListener, VnetOpError> {
        let mut listeners = self.inner.listeners.write().expect("listener registry lock poisoned");
        if listeners.contains_key(&port) {
            return Err(VnetOpError::new("listen", Some(VnetAddr::new(port)), VnetErr::PortInUse));
        }

        let shared = ListenerShared::new(port, Arc::downgrade(&self.inner));
        listeners.insert(port, Arc::clone(&shared));
        Ok(StreamListener::new(shared))
    }

    /// Looks up `"<client-id>:<port>"`, opens a fresh stream on that client's connection, and
    /// performs the dial handshake: write the 2-byte port, read the 1-byte status.
    pub async fn dial(&self, deadline: Option<Duration>, address: &str) -> Result<StreamConn, VnetOpError> {
        let (id, port) = split_dial_addr(address).map_err(|err| VnetOpError::new("dial", None, VnetErr::Io(io_err(err.to_string()))))?;

        let info_conn = {
            let connections = self.inner.connections.read().expect("connection registry lock poisoned");
            connections.get(id).cloned()
        }
        .ok_or_else(|| VnetOpError::new("dial", Some(VnetAddr::new(port)), VnetErr::NoRoute(id.to_owned())))?;

        let deadline = deadline.unwrap_or(DEFAULT_STREAM_DEADLINE);
        let handshake = with_deadline(deadline, async {
            let (mut send, mut recv) = info_conn.connection.open_bi().await.map_err(|err| io_err(err.to_string()))?;
            port.write(&mut send).await?;
            let status = u8::read(&mut recv).await?;
            Ok((send, recv, status))
        });
        let (mut send, recv, status) = handshake.await.map_err(|err| VnetOpError::new("dial", Some(VnetAddr::new(port)), VnetErr::Io(err)))?;
        if let Some(errno) = DialErrno::from_status_byte(status) {
            let _ = send.finish().await;
            return Err(VnetOpError::new("dial", Some(VnetAddr::new(port)), VnetErr::Dial(errno)));
        }

        let local_addr = local_addr_of(&info_conn.connection);
        Ok(StreamConn::new(local_addr, info_conn.connection.remote_address(), Arc::clone(&info_conn.info), send, recv))
    }

    /// Processes one accepted QUIC session end to end: first-stream handshake, then the
    /// per-stream accept loop. Runs until the session ends.
    pub(crate) async fn accept_connection(&self, connection: Connection) {
        let remote = connection.remote_address();
        let (mut send, mut recv) = match connection.accept_bi().await {
            Ok(pair) => pair,
            Err(error) => {
                println!("vnet: {remote}: failed to accept handshake stream: {error}");
                return;
            }
        };

        let info = match self.handshake(&connection, &mut recv).await {
            Ok(info) => info,
            Err(reason) => {
                println!("vnet: {remote}: handshake rejected: {reason}");
                let _ = write_json(&mut send, &HandshakeResult::failure(reason)).await;
                let _ = send.finish().await;
                connection.close(quinn::VarInt::from_u32(1), b"handshake rejected");
                return;
            }
        };

        println!("vnet: {remote}: client {info} handshake ok");
        if write_json(&mut send, &HandshakeResult::ok()).await.is_err() || send.finish().await.is_err() {
            println!("vnet: {remote}: failed to write handshake success reply");
            self.unregister_connection(&info.id, &connection);
            return;
        }

        self.serve_session(connection, info).await;
    }

    /// Decodes and validates the first-stream `ClientInfo`, rejecting a duplicate id, and
    /// registers the connection under the read id. Returns the human-readable rejection reason
    /// on any failure, the form written back in `HandshakeResult.message`.
    async fn handshake(&self, connection: &Connection, recv: &mut quinn::RecvStream) -> Result<Arc<ClientInfo>, String> {
        let decode = read_json_capped::<_, ClientInfo>(recv);
        let info = match self.inner.handshake_timeout {
            Some(timeout) => with_deadline(timeout, decode).await,
            None => decode.await,
        }
        .map_err(|err| format!("bad handshake packet: {err}"))?;

        info.validate().map_err(|err| err.to_owned())?;

        let mut connections = self.inner.connections.write().expect("connection registry lock poisoned");
        if connections.contains_key(&info.id) {
            return Err(format!("duplicate id: {}", info.id));
        }

        let info = Arc::new(info);
        connections.insert(info.id.clone(), Arc::new(InfoConn { connection: connection.clone(), info: Arc::clone(&info) }));
        Ok(info)
    }

    /// Removes the registry entry for `id` only if it still points at `connection` — a second
    /// handshake for the same id is rejected before it can overwrite the first's registration
    /// (see the duplicate-id policy), so this never deletes a newer registration.
    fn unregister_connection(&self, id: &str, connection: &Connection) {
        let mut connections = self.inner.connections.write().expect("connection registry lock poisoned");
        if connections.get(id).is_some_and(|existing| existing.connection.stable_id() == connection.stable_id()) {
            connections.remove(id);
        }
    }

    async fn serve_session(&self, connection: Connection, info: Arc<ClientInfo>) {
        let mut backoff = Backoff::new();
        loop {
            match connection.accept_bi().await {
                Ok((send, recv)) => {
                    backoff.reset();
                    let mux = self.clone();
                    let info = Arc::clone(&info);
                    let local_addr = local_addr_of(&connection);
                    let remote_addr = connection.remote_address();
                    tokio::spawn(async move {
                        mux.serve_stream(local_addr, remote_addr, info, send, recv).await;
                    });
                }
                Err(error) => {
                    if is_transient(&error) {
                        let delay = backoff.next_delay();
                        println!("vnet: {}: transient accept-stream error, retrying in {delay:?}: {error}", connection.remote_address());
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    println!("vnet: {}: session ended: {error}", connection.remote_address());
                    break;
                }
            }
        }

        self.unregister_connection(&info.id, &connection);
    }

    /// Handles one subsequent stream: read the 2-byte port, look up the listener, reply with a
    /// status byte, and on success hand the wrapped `StreamConn` to the listener's `establish`.
    async fn serve_stream(&self, local_addr: SocketAddr, remote_addr: SocketAddr, info: Arc<ClientInfo>, mut send: quinn::SendStream, mut recv: quinn::RecvStream) {
        let read_port = with_deadline(DEFAULT_STREAM_DEADLINE, async { u16::read(&mut recv).await });
        let port = match read_port.await {
            Ok(port) => port,
            Err(error) => {
                println!("vnet: {remote_addr}: bad dial frame: {error}");
                let _ = DialStatus::HandshakePacket.into_u8().write(&mut send).await;
                let _ = send.finish().await;
                return;
            }
        };

        let listener = {
            let listeners = self.inner.listeners.read().expect("listener registry lock poisoned");
            listeners.get(&port).cloned()
        };

        let listener = match listener {
            Some(listener) => listener,
            None => {
                let _ = DialStatus::PortUnreachable.into_u8().write(&mut send).await;
                let _ = send.finish().await;
                return;
            }
        };

        if let Err(error) = DialStatus::Ok.into_u8().write(&mut send).await {
            println!("vnet: {remote_addr}: failed to write dial status: {error}");
            return;
        }

        let conn = StreamConn::new(local_addr, remote_addr, info, send, recv);
        if let Err(error) = listener.establish(conn).await {
            println!("vnet: {remote_addr}: port {port}: {error}");
        }
    }
}

impl ConnectionHandler for StreamMux {
    fn handle(&self, connection: Connection) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        let mux = self.clone();
        Box::pin(async move { mux.accept_connection(connection).await })
    }
}

fn local_addr_of(connection: &Connection) -> SocketAddr {
    SocketAddr::new(connection.local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), 0)
}

fn io_err(message: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_twice_on_same_port_is_port_in_use() {
        let mux = StreamMux::new(None);
        let _first = mux.listen(8080).unwrap();
        let err = mux.listen(8080).unwrap_err();
        assert!(matches!(err.err, VnetErr::PortInUse));
    }

    #[test]
    fn listen_after_close_frees_the_port() {
        let mux = StreamMux::new(None);
        let first = mux.listen(8080).unwrap();
        first.close().unwrap();
        assert!(mux.listen(8080).is_ok());
    }

    #[tokio::test]
    async fn dial_with_unknown_client_id_is_no_route() {
        let mux = StreamMux::new(None);
        let err = mux.dial(None, "nobody:80").await.unwrap_err();
        assert!(matches!(err.err, VnetErr::NoRoute(ref id) if id == "nobody"));
    }

    #[tokio::test]
    async fn dial_with_malformed_address_is_reported() {
        let mux = StreamMux::new(None);
        let err = mux.dial(None, "missing-port").await.unwrap_err();
        assert!(matches!(err.err, VnetErr::Io(_)));
    }
}
