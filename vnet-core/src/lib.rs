//! A bidirectional reverse tunneling multiplexer over QUIC.
//!
//! Remote clients each hold one long-lived QUIC connection to a central [`mux::StreamMux`]. The
//! mux can dial virtual ports the client exposes (outbound, server-initiated); the client can
//! dial virtual ports the mux has listening (inbound, client-initiated). Both directions share
//! the same per-stream dial handshake; see [`mux`] for the protocol core.

pub mod backoff;
pub mod client;
pub mod conn;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod mux;
pub mod server;
pub mod transport;

#[cfg(test)]
pub(crate) mod tests_support;

pub use client::ClientConn;
pub use conn::{from_conn, StreamConn, WithClientInfo};
pub use error::{VnetErr, VnetOpError};
pub use listener::StreamListener;
pub use mux::StreamMux;
pub use server::{ConnectionHandler, Server};

pub use vnet_proto::{ClientInfo, DialErrno, HandshakeResult, VnetAddr};
