//! Wire formats for the vnet reverse tunneling protocol: the JSON connection handshake, the
//! 2-byte port header and 1-byte status reply of the dial handshake, and the small address types
//! that appear at the edges of the API.

pub mod addr;
pub mod framing;
pub mod handshake;
pub mod status;

pub use addr::{split_dial_addr, DialAddrError, VnetAddr};
pub use framing::{ByteRead, ByteWrite};
pub use handshake::{read_json_capped, write_json, ClientInfo, HandshakeResult, MAX_HANDSHAKE_BYTES};
pub use status::{DialErrno, DialStatus, U8ReprEnum};

/// The QUIC ALPN / application-layer protocol identifier negotiated by both ends.
pub const ALPN_PROTOCOL: &[u8] = b"vnet";
