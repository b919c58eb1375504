//! A minimal end-to-end example of the vnet reverse tunneling multiplexer: in server mode, binds
//! virtual port 80 behind a toy echo handler; in client mode, handshakes and dials port 80,
//! exchanging `PING`/`PONG` once. Arguments are parsed by hand, following the teacher's own
//! `args` module rather than pulling in `clap` (see SPEC_FULL.md's Configuration notes).

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::process::exit;
use std::sync::Arc;

use mac_address::MacAddress;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use vnet_core::endpoint::{make_client_endpoint, make_server_endpoint};
use vnet_core::{ClientConn, ConnectionHandler, Server, StreamMux};
use vnet_proto::ClientInfo;

const VIRTUAL_PORT: u16 = 80;

fn usage() -> ! {
    eprintln!("vnet-demo server <bind-addr>");
    eprintln!("vnet-demo client <server-addr> <client-id>");
    exit(1);
}

#[tokio::main]
async fn main() {
    let mut args = env::args().skip(1);
    let mode = args.next().unwrap_or_default();

    let result = match mode.as_str() {
        "server" => {
            let bind_addr = args.next().unwrap_or_else(|| usage()).parse().unwrap_or_else(|_| usage());
            run_server(bind_addr).await
        }
        "client" => {
            let server_addr = args.next().unwrap_or_else(|| usage()).parse().unwrap_or_else(|_| usage());
            let client_id = args.next().unwrap_or_else(|| usage());
            run_client(server_addr, client_id).await
        }
        _ => usage(),
    };

    if let Err(error) = result {
        eprintln!("vnet-demo: {error}");
        exit(1);
    }
}

async fn run_server(bind_addr: SocketAddr) -> std::io::Result<()> {
    let (endpoint, _cert_der) = make_server_endpoint(bind_addr)?;
    println!("vnet-demo: listening on {}", endpoint.local_addr()?);

    let mux = StreamMux::new(None);
    let handler: Arc<dyn ConnectionHandler> = Arc::new(mux.clone());
    let server = Server::new(handler);

    let serve_endpoint = endpoint.clone();
    let serve_server = server.clone();
    tokio::spawn(async move {
        if let Err(error) = serve_server.serve(serve_endpoint).await {
            println!("vnet-demo: accept loop ended: {error}");
        }
    });

    let listener = mux.listen(VIRTUAL_PORT).map_err(std::io::Error::from)?;
    println!("vnet-demo: listening on virtual port {VIRTUAL_PORT}");

    loop {
        let mut conn = listener.accept().await.map_err(std::io::Error::from)?;
        let client_id = conn.client_info().id.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 4];
            match conn.read_exact(&mut buf).await {
                Ok(_) => println!("vnet-demo: {client_id}: received {:?}", String::from_utf8_lossy(&buf)),
                Err(error) => {
                    println!("vnet-demo: {client_id}: read error: {error}");
                    return;
                }
            }

            if let Err(error) = conn.write_all(b"PONG").await {
                println!("vnet-demo: {client_id}: write error: {error}");
            }
        });
    }
}

async fn run_client(server_addr: SocketAddr, client_id: String) -> std::io::Result<()> {
    let unspecified: SocketAddr = if server_addr.is_ipv6() { "[::]:0".parse().unwrap() } else { "0.0.0.0:0".parse().unwrap() };
    let endpoint = make_client_endpoint(unspecified)?;

    let info = ClientInfo {
        id: client_id,
        inet: local_inet_towards(server_addr)?,
        mac: mac_address::get_mac_address().ok().flatten().unwrap_or(MacAddress::new([0; 6])),
        pid: std::process::id(),
    };

    let client = ClientConn::connect(&endpoint, server_addr, "localhost", info).await.map_err(std::io::Error::from)?;
    println!("vnet-demo: handshake ok as {}", client.client_info());

    let mut conn = client.dial_port(None, VIRTUAL_PORT).await.map_err(std::io::Error::from)?;

    conn.write_all(b"PING").await?;
    let mut buf = [0u8; 4];
    conn.read_exact(&mut buf).await?;
    println!("vnet-demo: received {:?}", String::from_utf8_lossy(&buf));

    Ok(())
}

/// The local IP that would be used to reach `target`, found by "connecting" a throwaway UDP
/// socket to it (no packets are actually sent). `ClientInfo.inet` must not be the unspecified
/// address, which ruling out the endpoint's own `0.0.0.0`/`::` bind address requires.
fn local_inet_towards(target: SocketAddr) -> std::io::Result<IpAddr> {
    let bind_addr: SocketAddr = if target.is_ipv6() { "[::]:0".parse().unwrap() } else { "0.0.0.0:0".parse().unwrap() };
    let socket = std::net::UdpSocket::bind(bind_addr)?;
    socket.connect(target)?;
    Ok(socket.local_addr()?.ip())
}
