//! Raw transports.
//!
//! A transport turns a [`Multiaddr`] into raw duplex byte connections. It
//! knows nothing about identities or encryption; the secure channel runs on
//! top of whatever [`BoxedIo`] it returns.
//!
//! - [`TcpTransport`] - `/ip4|ip6/<host>/tcp/<port>`
//! - [`MemoryTransport`] - `/memory/<port>` inside one [`MemoryHub`]

use async_trait::async_trait;
use plexus_types::Multiaddr;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::NetworkResult;

mod memory;
mod tcp;

pub use memory::{MemoryHub, MemoryTransport};
pub use tcp::TcpTransport;

/// A raw duplex byte connection.
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed raw connection as handed to the secure channel.
pub type BoxedIo = Box<dyn AsyncIo>;

/// Source of raw connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Whether this transport can handle `addr`.
    fn supports(&self, addr: &Multiaddr) -> bool;

    /// Start listening. The listener reports the concrete bound address.
    async fn listen(&self, addr: &Multiaddr) -> NetworkResult<Box<dyn Listener>>;

    /// Open a raw connection. Failures map to `NetworkError::Unreachable`.
    async fn connect(&self, addr: &Multiaddr) -> NetworkResult<BoxedIo>;
}

/// A bound listener yielding inbound raw connections.
#[async_trait]
pub trait Listener: Send + 'static {
    /// The concrete bound address (ports resolved).
    fn local_addr(&self) -> Multiaddr;

    /// Addresses remote peers can dial to reach this listener.
    ///
    /// Differs from [`local_addr`](Listener::local_addr) when bound to a
    /// wildcard host, which is never announced as is.
    fn listen_addrs(&self) -> Vec<Multiaddr> {
        vec![self.local_addr()]
    }

    /// Wait for the next inbound connection and its remote address.
    async fn accept(&mut self) -> NetworkResult<(BoxedIo, Multiaddr)>;
}
