//! The crate's error taxonomy: a `net.OpError`-shaped [`VnetOpError`] wrapping one of a small
//! set of well-known causes ([`VnetErr`]), following the reference implementation's structured
//! errors rather than a single flat `io::Error`.

use std::fmt;
use std::io;

use vnet_proto::{DialErrno, VnetAddr};

/// The underlying cause of a [`VnetOpError`].
#[derive(Debug)]
pub enum VnetErr {
    /// The listener (or server) was already closed.
    Closed,
    /// `listen()` was called for a virtual port that already has a listener.
    PortInUse,
    /// The remote end rejected a dial with a non-success status byte.
    Dial(DialErrno),
    /// No connection is registered for the requested client id.
    NoRoute(String),
    /// Any other I/O failure surfaced by the transport.
    Io(io::Error),
}

impl fmt::Display for VnetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("use of closed network connection"),
            Self::PortInUse => f.write_str("port already in use"),
            Self::Dial(errno) => errno.fmt(f),
            Self::NoRoute(id) => write!(f, "no route to client: {id}"),
            Self::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for VnetErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dial(errno) => Some(errno),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

/// Mirrors Go's `net.OpError`: the failing operation, network name, local address (if known),
/// and the underlying cause.
#[derive(Debug)]
pub struct VnetOpError {
    pub op: &'static str,
    pub net: &'static str,
    pub addr: Option<VnetAddr>,
    pub err: VnetErr,
}

impl VnetOpError {
    pub fn new(op: &'static str, addr: Option<VnetAddr>, err: VnetErr) -> Self {
        Self { op, net: "vnet", addr, err }
    }

    pub fn closed(op: &'static str, addr: Option<VnetAddr>) -> Self {
        Self::new(op, addr, VnetErr::Closed)
    }

    /// The dial status byte the remote refused with, if that's what caused this error.
    pub fn dial_errno(&self) -> Option<DialErrno> {
        match self.err {
            VnetErr::Dial(errno) => Some(errno),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.err, VnetErr::Closed)
    }
}

impl fmt::Display for VnetOpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.net)?;
        if let Some(addr) = &self.addr {
            write!(f, " {addr}")?;
        }
        write!(f, ": {}", self.err)
    }
}

impl std::error::Error for VnetOpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.err)
    }
}

impl From<VnetOpError> for io::Error {
    fn from(err: VnetOpError) -> Self {
        io::Error::new(io::ErrorKind::Other, err)
    }
}

/// The server has already been closed; returned by every `Server` call after the first `close()`.
pub fn err_server_closed() -> VnetOpError {
    VnetOpError::closed("close", None)
}

/// The listener has already been closed; returned by every `StreamListener` call after the
/// first `close()`.
pub fn err_listener_closed(op: &'static str, addr: VnetAddr) -> VnetOpError {
    VnetOpError::closed(op, Some(addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_op_net_and_addr() {
        let err = VnetOpError::new("dial", Some(VnetAddr::new(8080)), VnetErr::NoRoute("10001".to_owned()));
        let rendered = err.to_string();
        assert!(rendered.contains("dial"));
        assert!(rendered.contains("vnet"));
        assert!(rendered.contains("8080"));
        assert!(rendered.contains("10001"));
    }

    #[test]
    fn closed_helpers_round_trip_is_closed() {
        assert!(err_server_closed().is_closed());
        assert!(err_listener_closed("accept", VnetAddr::new(80)).is_closed());
    }
}
