use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use plexus_types::{Multiaddr, Protocol};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace, warn};

use super::{BoxedIo, Listener, Transport};
use crate::error::{NetworkError, NetworkResult};

/// TCP transport with `TCP_NODELAY` set on every socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

/// Parse `/ip4|ip6/<host>/tcp/<port>` into a socket address.
fn socket_addr(addr: &Multiaddr) -> Option<SocketAddr> {
    let mut components = addr.iter();

    let host: IpAddr = match components.next() {
        Some(Protocol::Ip4(host)) => host.into(),
        Some(Protocol::Ip6(host)) => host.into(),
        _ => return None,
    };

    let Some(Protocol::Tcp(port)) = components.next() else {
        return None;
    };

    if components.next().is_some() {
        return None;
    }

    Some(SocketAddr::from((host, port)))
}

fn multiaddr(addr: SocketAddr) -> Multiaddr {
    Multiaddr::from(addr.ip()).with(Protocol::Tcp(addr.port()))
}

/// Dialable addresses for a socket bound to `local`.
///
/// A wildcard host expands to every interface address of the same family,
/// falling back to loopback when none can be listed.
fn dialable_addrs(local: SocketAddr) -> Vec<Multiaddr> {
    if !local.ip().is_unspecified() {
        return vec![multiaddr(local)];
    }

    let mut hosts = interface_ips(local.is_ipv4());
    if hosts.is_empty() {
        hosts.push(if local.is_ipv4() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            IpAddr::V6(Ipv6Addr::LOCALHOST)
        });
    }
    hosts
        .into_iter()
        .map(|host| multiaddr(SocketAddr::new(host, local.port())))
        .collect()
}

fn interface_ips(ipv4: bool) -> Vec<IpAddr> {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!(error = %e, "Failed to list network interfaces");
            return Vec::new();
        }
    };

    let mut hosts: Vec<IpAddr> = interfaces
        .into_iter()
        .map(|(_, ip)| ip)
        .filter(|ip| ip.is_ipv4() == ipv4 && !ip.is_unspecified() && !is_link_local_v6(ip))
        .collect();
    hosts.sort();
    hosts.dedup();
    hosts
}

// Link-local v6 addresses need a zone id to be dialed.
fn is_link_local_v6(ip: &IpAddr) -> bool {
    matches!(ip, IpAddr::V6(v6) if (v6.segments()[0] & 0xffc0) == 0xfe80)
}

#[async_trait]
impl Transport for TcpTransport {
    fn supports(&self, addr: &Multiaddr) -> bool {
        socket_addr(addr).is_some()
    }

    async fn listen(&self, addr: &Multiaddr) -> NetworkResult<Box<dyn Listener>> {
        let socket = socket_addr(addr)
            .ok_or_else(|| NetworkError::UnsupportedAddress(addr.to_string()))?;

        let listener = TcpListener::bind(socket).await?;
        let bound = listener.local_addr()?;
        let local = multiaddr(bound);
        let dialable = dialable_addrs(bound);
        debug!(address = %local, dialable = ?dialable, "TCP listener bound");

        Ok(Box::new(TcpListenerHandle {
            listener,
            local,
            dialable,
        }))
    }

    async fn connect(&self, addr: &Multiaddr) -> NetworkResult<BoxedIo> {
        let socket = socket_addr(addr)
            .ok_or_else(|| NetworkError::UnsupportedAddress(addr.to_string()))?;

        let stream = TcpStream::connect(socket)
            .await
            .map_err(|e| NetworkError::Unreachable(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        trace!(address = %addr, "TCP connection established");

        Ok(Box::new(stream))
    }
}

struct TcpListenerHandle {
    listener: TcpListener,
    local: Multiaddr,
    dialable: Vec<Multiaddr>,
}

#[async_trait]
impl Listener for TcpListenerHandle {
    fn local_addr(&self) -> Multiaddr {
        self.local.clone()
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.dialable.clone()
    }

    async fn accept(&mut self) -> NetworkResult<(BoxedIo, Multiaddr)> {
        let (stream, remote) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), multiaddr(remote)))
    }
}
