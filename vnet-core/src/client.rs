//! The far side of `mux.rs`'s wire protocol: dials the multiplexer, performs the client
//! handshake, and exposes an outbound `dial_port` primitive. Symmetric with
//! `StreamMux::handle`'s per-connection handshake and `StreamMux::dial`'s per-stream dial,
//! grounded in the same `tunnel_proto` handshake shape the teacher's own client/server pair uses.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use quinn::{Connection, Endpoint};

use vnet_proto::{read_json_capped, write_json, ByteRead, ByteWrite, ClientInfo, DialErrno, HandshakeResult, VnetAddr};

use crate::conn::StreamConn;
use crate::error::{VnetErr, VnetOpError};
use crate::transport::with_deadline;

const DEFAULT_STREAM_DEADLINE: Duration = Duration::from_secs(10);

/// A client-side session with the multiplexer: one QUIC connection plus the [`ClientInfo`] it
/// successfully registered with.
pub struct ClientConn {
    connection: Connection,
    info: Arc<ClientInfo>,
}

impl ClientConn {
    /// Dials `server_addr` on `endpoint` (negotiating the `vnet` ALPN via the endpoint's client
    /// config) and performs the connection handshake: open a stream, write `info` as JSON, close
    /// the write half, and read back a `HandshakeResult`.
    pub async fn connect(endpoint: &Endpoint, server_addr: SocketAddr, server_name: &str, info: ClientInfo) -> Result<Self, VnetOpError> {
        info.validate().map_err(|err| VnetOpError::new("dial", None, VnetErr::Io(io_err(err))))?;

        let connecting = endpoint
            .connect(server_addr, server_name)
            .map_err(|err| VnetOpError::new("dial", None, VnetErr::Io(io_err(err.to_string()))))?;
        let connection = connecting.await.map_err(|err| VnetOpError::new("dial", None, VnetErr::Io(io_err(err.to_string()))))?;

        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|err| VnetOpError::new("dial", None, VnetErr::Io(io_err(err.to_string()))))?;

        write_json(&mut send, &info).await.map_err(|err| VnetOpError::new("dial", None, VnetErr::Io(err)))?;
        send.finish().await.map_err(|err| VnetOpError::new("dial", None, VnetErr::Io(io_err(err.to_string()))))?;

        let result: HandshakeResult = read_json_capped(&mut recv).await.map_err(|err| VnetOpError::new("dial", None, VnetErr::Io(err)))?;
        if !result.successful {
            return Err(VnetOpError::new("dial", None, VnetErr::Io(io_err(result.message))));
        }

        println!("vnet: handshake accepted by {server_addr}");
        Ok(Self { connection, info: Arc::new(info) })
    }

    pub fn client_info(&self) -> &Arc<ClientInfo> {
        &self.info
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Opens a fresh stream and performs the dial handshake for `port`: write the 2-byte port,
    /// read the 1-byte status. The client-side mirror of `StreamMux::dial`.
    pub async fn dial_port(&self, deadline: Option<Duration>, port: u16) -> Result<StreamConn, VnetOpError> {
        let deadline = deadline.unwrap_or(DEFAULT_STREAM_DEADLINE);

        let handshake = with_deadline(deadline, async {
            let (mut send, mut recv) = self.connection.open_bi().await.map_err(|err| io_err(err.to_string()))?;
            port.write(&mut send).await?;
            let status = u8::read(&mut recv).await?;
            Ok((send, recv, status))
        });
        let (mut send, recv, status) = handshake.await.map_err(|err| VnetOpError::new("dial", Some(VnetAddr::new(port)), VnetErr::Io(err)))?;
        if let Some(errno) = DialErrno::from_status_byte(status) {
            let _ = send.finish().await;
            return Err(VnetOpError::new("dial", Some(VnetAddr::new(port)), VnetErr::Dial(errno)));
        }

        let local_addr = SocketAddr::new(self.connection.local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), 0);
        Ok(StreamConn::new(local_addr, self.connection.remote_address(), Arc::clone(&self.info), send, recv))
    }
}

fn io_err(message: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, message.into())
}
