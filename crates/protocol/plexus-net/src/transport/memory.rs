use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use plexus_types::{Multiaddr, Protocol};
use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;
use tracing::debug;

use super::{BoxedIo, Listener, Transport};
use crate::error::{NetworkError, NetworkResult};

/// Per-direction buffer of an in-memory connection.
const MEMORY_BUFFER: usize = 256 * 1024;

/// Pending connections queued per listener.
const ACCEPT_BACKLOG: usize = 32;

type Incoming = (DuplexStream, Multiaddr);

#[derive(Debug, Default)]
struct HubInner {
    listeners: HashMap<u64, mpsc::Sender<Incoming>>,
    next_port: u64,
}

/// An isolated in-process network.
///
/// Nodes built on transports from the same hub can reach each other through
/// `/memory/<port>` addresses. Hubs share nothing, so tests can run any
/// number of independent networks in one process.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport attached to this hub.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { hub: self.clone() }
    }

    fn bind(&self, port: u64) -> NetworkResult<(u64, mpsc::Receiver<Incoming>)> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| NetworkError::Transport("memory hub lock poisoned".into()))?;

        let port = if port == 0 {
            loop {
                inner.next_port += 1;
                if !inner.listeners.contains_key(&inner.next_port) {
                    break inner.next_port;
                }
            }
        } else if inner.listeners.contains_key(&port) {
            return Err(NetworkError::Transport(format!(
                "/memory/{} already in use",
                port
            )));
        } else {
            port
        };

        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        inner.listeners.insert(port, tx);
        Ok((port, rx))
    }

    fn unbind(&self, port: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.listeners.remove(&port);
        }
    }

    fn sender(&self, port: u64) -> Option<mpsc::Sender<Incoming>> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.listeners.get(&port).cloned())
    }
}

/// Transport over a [`MemoryHub`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
}

impl MemoryTransport {
    pub fn new(hub: &MemoryHub) -> Self {
        hub.transport()
    }
}

fn memory_port(addr: &Multiaddr) -> Option<u64> {
    let mut components = addr.iter();
    match (components.next(), components.next()) {
        (Some(Protocol::Memory(port)), None) => Some(port),
        _ => None,
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn supports(&self, addr: &Multiaddr) -> bool {
        memory_port(addr).is_some()
    }

    async fn listen(&self, addr: &Multiaddr) -> NetworkResult<Box<dyn Listener>> {
        let port =
            memory_port(addr).ok_or_else(|| NetworkError::UnsupportedAddress(addr.to_string()))?;
        let (port, incoming) = self.hub.bind(port)?;
        debug!(port, "Memory listener bound");

        Ok(Box::new(MemoryListener {
            hub: self.hub.clone(),
            port,
            incoming,
        }))
    }

    async fn connect(&self, addr: &Multiaddr) -> NetworkResult<BoxedIo> {
        let port =
            memory_port(addr).ok_or_else(|| NetworkError::UnsupportedAddress(addr.to_string()))?;
        let sender = self
            .hub
            .sender(port)
            .ok_or_else(|| NetworkError::Unreachable(format!("nothing listening on {}", addr)))?;

        let (local, remote) = duplex(MEMORY_BUFFER);
        let dialer = Multiaddr::empty().with(Protocol::Memory(0));
        sender
            .send((remote, dialer))
            .await
            .map_err(|_| NetworkError::Unreachable(format!("listener on {} closed", addr)))?;

        Ok(Box::new(local))
    }
}

struct MemoryListener {
    hub: MemoryHub,
    port: u64,
    incoming: mpsc::Receiver<Incoming>,
}

#[async_trait]
impl Listener for MemoryListener {
    fn local_addr(&self) -> Multiaddr {
        Multiaddr::empty().with(Protocol::Memory(self.port))
    }

    async fn accept(&mut self) -> NetworkResult<(BoxedIo, Multiaddr)> {
        match self.incoming.recv().await {
            Some((io, remote)) => Ok((Box::new(io), remote)),
            None => Err(NetworkError::Transport(format!(
                "/memory/{} listener closed",
                self.port
            ))),
        }
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.hub.unbind(self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_port_zero_allocates() {
        let hub = MemoryHub::new();
        let transport = hub.transport();
        let a = transport.listen(&"/memory/0".parse().unwrap()).await.unwrap();
        let b = transport.listen(&"/memory/0".parse().unwrap()).await.unwrap();
        assert_ne!(a.local_addr(), b.local_addr());
        assert_ne!(a.local_addr(), "/memory/0".parse::<Multiaddr>().unwrap());
    }

    #[tokio::test]
    async fn test_port_in_use() {
        let hub = MemoryHub::new();
        let transport = hub.transport();
        let _a = transport.listen(&"/memory/7".parse().unwrap()).await.unwrap();
        let result = transport.listen(&"/memory/7".parse().unwrap()).await;
        assert!(matches!(result, Err(NetworkError::Transport(_))));
    }

    #[tokio::test]
    async fn test_connect_roundtrip() {
        let hub = MemoryHub::new();
        let transport = hub.transport();
        let mut listener = transport.listen(&"/memory/7".parse().unwrap()).await.unwrap();

        let mut client = transport
            .connect(&"/memory/7".parse().unwrap())
            .await
            .unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        client.write_all(b"from 2 to 1").await.unwrap();
        let mut buf = [0u8; 11];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"from 2 to 1");
    }

    #[tokio::test]
    async fn test_hubs_are_isolated() {
        let first = MemoryHub::new();
        let second = MemoryHub::new();
        let _listener = first
            .transport()
            .listen(&"/memory/9".parse().unwrap())
            .await
            .unwrap();

        let result = second
            .transport()
            .connect(&"/memory/9".parse().unwrap())
            .await;
        assert!(matches!(result, Err(NetworkError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_dropped_listener_frees_port() {
        let hub = MemoryHub::new();
        let transport = hub.transport();
        let listener = transport.listen(&"/memory/3".parse().unwrap()).await.unwrap();
        drop(listener);

        assert!(matches!(
            transport.connect(&"/memory/3".parse().unwrap()).await,
            Err(NetworkError::Unreachable(_))
        ));
        assert!(transport.listen(&"/memory/3".parse().unwrap()).await.is_ok());
    }
}
