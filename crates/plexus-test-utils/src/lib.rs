//! Shared test utilities for plexus.
//!
//! Nodes built here run over a [`MemoryHub`](plexus_net::MemoryHub), so tests
//! never touch real sockets.

pub mod helpers;
pub mod network;

pub use helpers::*;
pub use network::*;
