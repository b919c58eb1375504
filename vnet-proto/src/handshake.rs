//! The connection handshake frame: a single JSON `ClientInfo` object followed, after the first
//! stream's write half is closed, by a single JSON `HandshakeResult` object.

use std::fmt;
use std::io::{self, Error, ErrorKind};
use std::net::IpAddr;

use mac_address::MacAddress;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Caps the number of bytes read while decoding a handshake JSON object, guarding against a
/// hostile peer that never closes its write half.
pub const MAX_HANDSHAKE_BYTES: u64 = 4 * 1024;

/// Identifies a connecting client: its routing id, outbound IP, and informational MAC/PID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub inet: IpAddr,
    pub mac: MacAddress,
    pub pid: u32,
}

impl ClientInfo {
    /// `id` non-empty and `inet` not the unspecified address (`0.0.0.0` / `::`).
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.id.is_empty() {
            return Err("id must not be empty");
        }
        if self.inet.is_unspecified() {
            return Err("inet must not be the unspecified address");
        }
        Ok(())
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.inet, self.id)
    }
}

/// Reply to a `ClientInfo` handshake. `message` is populated only when `successful` is `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResult {
    pub successful: bool,
    #[serde(default)]
    pub message: String,
}

impl HandshakeResult {
    pub fn ok() -> Self {
        Self { successful: true, message: String::new() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { successful: false, message: message.into() }
    }
}

/// Serializes `value` as a single JSON object, with no trailing delimiter.
pub async fn write_json<W, T>(writer: &mut W, value: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let bytes = serde_json::to_vec(value).map_err(|err| Error::new(ErrorKind::InvalidData, err))?;
    writer.write_all(&bytes).await
}

/// Reads a single JSON object from `reader` until EOF, capped at [`MAX_HANDSHAKE_BYTES`] to
/// bound memory use against a peer that writes without ever closing.
pub async fn read_json_capped<R, T>(reader: &mut R) -> io::Result<T>
where
    R: AsyncRead + Unpin + ?Sized,
    T: for<'de> Deserialize<'de>,
{
    let mut buf = Vec::new();
    let read = reader.take(MAX_HANDSHAKE_BYTES + 1).read_to_end(&mut buf).await?;
    if read as u64 > MAX_HANDSHAKE_BYTES {
        return Err(Error::new(ErrorKind::InvalidData, "handshake payload exceeds size cap"));
    }

    serde_json::from_slice(&buf).map_err(|err| Error::new(ErrorKind::InvalidData, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn client_info_round_trips_through_json() {
        let info = ClientInfo {
            id: "10001".to_owned(),
            inet: IpAddr::V4(Ipv4Addr::new(172, 31, 61, 168)),
            mac: MacAddress::new([0, 1, 2, 3, 4, 5]),
            pid: 42,
        };

        let mut buf = Vec::new();
        write_json(&mut buf, &info).await.unwrap();

        let mut cursor = io::Cursor::new(buf);
        let decoded: ClientInfo = read_json_capped(&mut cursor).await.unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn empty_id_fails_validation() {
        let info = ClientInfo {
            id: String::new(),
            inet: IpAddr::V4(Ipv4Addr::new(172, 31, 61, 168)),
            mac: MacAddress::new([0; 6]),
            pid: 1,
        };
        assert!(info.validate().is_err());
    }

    #[test]
    fn unspecified_inet_fails_validation() {
        let info = ClientInfo {
            id: "10001".to_owned(),
            inet: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            mac: MacAddress::new([0; 6]),
            pid: 1,
        };
        assert!(info.validate().is_err());
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let mut buf = vec![b'['; (MAX_HANDSHAKE_BYTES + 16) as usize];
        buf.push(b']');
        let mut cursor = io::Cursor::new(buf);
        let result: io::Result<Vec<i32>> = read_json_capped(&mut cursor).await;
        assert!(result.is_err());
    }

    #[test]
    fn display_matches_ip_and_id() {
        let info = ClientInfo {
            id: "10001".to_owned(),
            inet: IpAddr::V4(Ipv4Addr::new(172, 31, 61, 168)),
            mac: MacAddress::new([0; 6]),
            pid: 1,
        };
        assert_eq!(info.to_string(), "172.31.61.168(10001)");
    }
}
