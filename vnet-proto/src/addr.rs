//! Address types for the virtual network: a listener's local address (just a virtual port) and
//! the `"<client-id>:<port>"` dial address parsed by `StreamMux::dial`.

use std::fmt;

/// The local address of a [`StreamListener`](../../vnet_core/listener/struct.StreamListener.html):
/// identifies it only by its virtual port, the way the reference implementation reuses
/// `net.UDPAddr{Port: port}` as a stand-in local address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VnetAddr {
    pub port: u16,
}

impl VnetAddr {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl fmt::Display for VnetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vnet::{}", self.port)
    }
}

/// Error returned when `"<client-id>:<port>"` fails to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialAddrError {
    MissingPort(String),
    InvalidPort(String),
}

impl fmt::Display for DialAddrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPort(addr) => write!(f, "address {addr} missing a ':port' suffix"),
            Self::InvalidPort(addr) => write!(f, "address {addr} has an invalid or out-of-range port"),
        }
    }
}

impl std::error::Error for DialAddrError {}

/// Splits `"<client-id>:<port>"` into the client id and virtual port, the wire-address form
/// accepted by `StreamMux::dial`.
pub fn split_dial_addr(address: &str) -> Result<(&str, u16), DialAddrError> {
    let (id, port_str) = address.rsplit_once(':').ok_or_else(|| DialAddrError::MissingPort(address.to_owned()))?;

    let port: u16 = port_str.parse().map_err(|_| DialAddrError::InvalidPort(address.to_owned()))?;

    Ok((id, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_id_and_port() {
        assert_eq!(split_dial_addr("10001:8080"), Ok(("10001", 8080)));
    }

    #[test]
    fn rejects_missing_port() {
        assert!(matches!(split_dial_addr("10001"), Err(DialAddrError::MissingPort(_))));
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert!(matches!(split_dial_addr("10001:99999"), Err(DialAddrError::InvalidPort(_))));
    }

    #[test]
    fn accepts_port_zero_and_max() {
        assert_eq!(split_dial_addr("a:0"), Ok(("a", 0)));
        assert_eq!(split_dial_addr("a:65535"), Ok(("a", 65535)));
    }
}
