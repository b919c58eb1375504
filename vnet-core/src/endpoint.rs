//! QUIC endpoint bootstrap: negotiates the `vnet` ALPN identifier, self-signs a development
//! certificate for the server side, and skips certificate verification on the client side.
//! Grounded in the reference tunneling crate's own `endpoint.rs`; out of the protocol core
//! proper, but required ambient plumbing to stand up a runnable client or server.
//!
//! The self-signed certificate and skip-verification client config are meant for local
//! development and the crate's own tests; a production deployment should build its own
//! `rustls::ServerConfig`/`ClientConfig` from real certificates and pass them to `quinn` directly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig, Endpoint, IdleTimeout, ServerConfig, TransportConfig, VarInt};

use vnet_proto::ALPN_PROTOCOL;

pub const KEEPALIVE_INTERVAL_MILLIS: u64 = 1000;
pub const MAX_IDLE_TIMEOUT_MILLIS: u32 = 10_000;

/// Builds a server-side endpoint bound at `bind_addr`, with a self-signed certificate for
/// `localhost`. Returns the endpoint and the certificate's DER bytes, so a test client can pin
/// it if it isn't using [`make_client_endpoint`]'s skip-verification default.
pub fn make_server_endpoint(bind_addr: SocketAddr) -> std::io::Result<(Endpoint, Vec<u8>)> {
    let (server_config, cert_der) = configure_server();
    let endpoint = Endpoint::server(server_config, bind_addr)?;
    Ok((endpoint, cert_der))
}

/// Builds a client-side endpoint bound at `bind_addr` (use `0.0.0.0:0` / `[::]:0` for an
/// ephemeral port), configured to dial servers negotiating `vnet`.
pub fn make_client_endpoint(bind_addr: SocketAddr) -> std::io::Result<Endpoint> {
    let mut endpoint = Endpoint::client(bind_addr)?;
    endpoint.set_default_client_config(configure_client());
    Ok(endpoint)
}

fn configure_client() -> ClientConfig {
    let mut crypto = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(SkipServerVerification::new())
        .with_no_client_auth();
    crypto.alpn_protocols = alpn_protocols();

    let mut client_config = ClientConfig::new(Arc::new(crypto));

    let mut transport_config = TransportConfig::default();
    transport_config.max_idle_timeout(Some(IdleTimeout::from(VarInt::from_u32(MAX_IDLE_TIMEOUT_MILLIS))));
    client_config.transport_config(Arc::new(transport_config));

    client_config
}

fn configure_server() -> (ServerConfig, Vec<u8>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()]).expect("self-signed cert generation cannot fail here");
    let cert_der = cert.serialize_der().expect("DER serialization of a freshly generated cert cannot fail");
    let priv_key = rustls::PrivateKey(cert.serialize_private_key_der());
    let cert_chain = vec![rustls::Certificate(cert_der.clone())];

    let mut crypto = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, priv_key)
        .expect("self-signed cert/key pair is well-formed");
    crypto.alpn_protocols = alpn_protocols();

    let mut server_config = ServerConfig::with_crypto(Arc::new(crypto));
    let transport_config = Arc::get_mut(&mut server_config.transport).expect("transport config has no other owners yet");
    transport_config.keep_alive_interval(Some(Duration::from_millis(KEEPALIVE_INTERVAL_MILLIS)));
    transport_config.max_idle_timeout(Some(IdleTimeout::from(VarInt::from_u32(MAX_IDLE_TIMEOUT_MILLIS))));

    (server_config, cert_der)
}

fn alpn_protocols() -> Vec<Vec<u8>> {
    vec![ALPN_PROTOCOL.to_vec()]
}

struct SkipServerVerification;

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_constant_is_vnet() {
        assert_eq!(alpn_protocols(), vec![b"vnet".to_vec()]);
    }

    #[test]
    fn server_endpoint_binds_ephemeral_port() {
        let (endpoint, cert_der) = make_server_endpoint("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(endpoint.local_addr().unwrap().port() > 0);
        assert!(!cert_der.is_empty());
    }
}
