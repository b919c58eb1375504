//! Test-only helpers. Not compiled into the published crate.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use mac_address::MacAddress;

use vnet_proto::ClientInfo;

use crate::conn::StreamConn;
use crate::endpoint::{make_client_endpoint, make_server_endpoint};

/// Spins up a loopback QUIC client/server pair and opens one bidirectional stream between them,
/// returning it wrapped as a `StreamConn` tagged with `ClientInfo{id: "loopback", ...}`. Used by
/// tests that need a real, working `StreamConn` but not a full multiplexer handshake.
///
/// The backing endpoints and connections are kept alive for the remainder of the test process by
/// a detached task; test-only, so this is simpler than threading their lifetimes back out.
pub(crate) async fn loopback_stream_conn() -> StreamConn {
    let (server_endpoint, _cert_der) = make_server_endpoint("127.0.0.1:0".parse().unwrap()).expect("server endpoint bind");
    let server_addr = server_endpoint.local_addr().expect("server local addr");
    let client_endpoint = make_client_endpoint("0.0.0.0:0".parse().unwrap()).expect("client endpoint bind");

    let connecting = client_endpoint.connect(server_addr, "localhost").expect("client connect");
    let accepting = server_endpoint.accept();
    let (client_result, incoming) = tokio::join!(connecting, accepting);

    let client_connection = client_result.expect("client handshake");
    let server_connection = incoming.expect("server received a connection attempt").await.expect("server handshake");

    let (send, _server_recv) = client_connection.open_bi().await.expect("client open_bi");
    let (_server_send, recv) = server_connection.accept_bi().await.expect("server accept_bi");

    let remote_addr = client_connection.remote_address();

    tokio::spawn(async move {
        let _keep_alive = (client_endpoint, server_endpoint, client_connection, server_connection, _server_recv, _server_send);
        std::future::pending::<()>().await;
    });

    let info = Arc::new(ClientInfo {
        id: "loopback".to_owned(),
        inet: IpAddr::V4(Ipv4Addr::LOCALHOST),
        mac: MacAddress::new([0; 6]),
        pid: 0,
    });

    StreamConn::new(server_addr, remote_addr, info, send, recv)
}
