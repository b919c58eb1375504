//! The 1-byte status reply on the dial handshake, and the [`U8ReprEnum`] convention used to
//! (de)serialize it, following the same pattern the tunneling protocol uses for its own
//! u8-tagged enums.

use std::fmt;

/// Allows a type to be converted into or parsed from a [`u8`] representation.
pub trait U8ReprEnum: Sized + Copy {
    fn from_u8(value: u8) -> Option<Self>;
    fn into_u8(self) -> u8;
}

/// Status byte written by the responder of a dial handshake.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialStatus {
    /// `0x00`: the listener accepted the stream, data phase begins.
    Ok = 0,
    /// `0x01`: no listener is registered on the requested virtual port.
    PortUnreachable = 1,
    /// `0x02`: the dial frame itself was malformed (short read, etc).
    HandshakePacket = 2,
    /// `0x03`: reserved for client-side establishment failures; servers never write this.
    Established = 3,
}

impl U8ReprEnum for DialStatus {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::PortUnreachable),
            2 => Some(Self::HandshakePacket),
            3 => Some(Self::Established),
            _ => None,
        }
    }

    fn into_u8(self) -> u8 {
        self as u8
    }
}

/// A non-success dial status, returned to callers as a typed error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialErrno(u8);

impl DialErrno {
    pub const PORT_UNREACHABLE: DialErrno = DialErrno(DialStatus::PortUnreachable as u8);
    pub const HANDSHAKE_PACKET: DialErrno = DialErrno(DialStatus::HandshakePacket as u8);
    pub const ESTABLISHED: DialErrno = DialErrno(DialStatus::Established as u8);

    /// Builds a `DialErrno` from a raw status byte. Returns `None` for `0x00` (success, not an
    /// error) or any byte outside the known range.
    pub fn from_status_byte(byte: u8) -> Option<Self> {
        match DialStatus::from_u8(byte)? {
            DialStatus::Ok => None,
            _ => Some(DialErrno(byte)),
        }
    }

    pub fn status(self) -> DialStatus {
        DialStatus::from_u8(self.0).expect("DialErrno only ever holds a valid, non-zero status byte")
    }
}

impl fmt::Display for DialErrno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self.status() {
            DialStatus::Ok => "ok",
            DialStatus::PortUnreachable => "vnet port unreachable",
            DialStatus::HandshakePacket => "vnet bad handshake packet body",
            DialStatus::Established => "vnet establish failed",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for DialErrno {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_byte_is_not_an_errno() {
        assert_eq!(DialErrno::from_status_byte(0), None);
    }

    #[test]
    fn unknown_byte_is_not_an_errno() {
        assert_eq!(DialErrno::from_status_byte(0xff), None);
    }

    #[test]
    fn known_error_bytes_round_trip_through_display() {
        assert_eq!(DialErrno::from_status_byte(1).unwrap().to_string(), "vnet port unreachable");
        assert_eq!(DialErrno::from_status_byte(2).unwrap().to_string(), "vnet bad handshake packet body");
        assert_eq!(DialErrno::from_status_byte(3).unwrap().to_string(), "vnet establish failed");
    }
}
