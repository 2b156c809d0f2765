use crate::acme::SharedRecordStore;
use crate::config::SharedConfig;
use crate::dns::handlers::Handler;
use crate::error::Error;
use crate::store::{DynStore, IdGenerator};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use trust_dns_server::ServerFuture;

const TCP_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn new(
    config: SharedConfig,
    store: DynStore,
    acme_records: SharedRecordStore,
    generate_id: IdGenerator,
) -> Result<ServerFuture<Handler>, Error> {
    let server_ip = outbound_ipv4().await?;
    tracing::info!(%server_ip, "advertising server address in A answers");

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.dns.port));
    let handler = Handler::new(config, server_ip, store, acme_records, generate_id)?;
    let mut dns_server = ServerFuture::new(handler);
    dns_server.register_socket(UdpSocket::bind(addr).await?);
    dns_server.register_listener(TcpListener::bind(addr).await?, TCP_TIMEOUT);
    Ok(dns_server)
}

/// Discover the primary outbound IPv4 address by opening a UDP socket toward
/// a public anycast address and reading the chosen local address. Nothing is
/// sent. Failure aborts startup: without an address there is nothing to put
/// in A answers.
async fn outbound_ipv4() -> Result<Ipv4Addr, Error> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect("8.8.8.8:80").await?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(_) => Err(Error::NoOutboundIpv4),
    }
}
