//! Protocol constants.
//!
//! These constants define protocol identifiers, frame limits, timing
//! defaults, and pubsub/discovery parameters shared across the stack.

// =============================================================================
// Protocol Version
// =============================================================================

/// Magic byte opening every secure-channel hello.
pub const HANDSHAKE_MAGIC: u8 = 0x50;

/// Current secure-channel handshake version
pub const HANDSHAKE_VERSION: u8 = 0x01;

// =============================================================================
// Protocol Identifiers
// =============================================================================

/// Header exchanged at the start of every stream negotiation.
pub const MULTISTREAM_PROTOCOL: &str = "/multistream/1.0.0";

/// Negotiation reply meaning "protocol not available".
pub const NEGOTIATION_NA: &str = "na";

/// Negotiation request asking the acceptor to list its protocols.
pub const NEGOTIATION_LS: &str = "ls";

/// Reserved control protocol used by the flood pubsub router.
pub const FLOODSUB_PROTOCOL: &str = "/floodsub/1.0.0";

/// Built-in echo protocol used for liveness checks.
pub const PING_PROTOCOL: &str = "/ipfs/ping/1.0.0";

/// Payload size of a single ping.
pub const PING_SIZE: usize = 32;

// =============================================================================
// Frame Limits
// =============================================================================

/// Maximum plaintext carried by one secure-channel frame: 64 KiB
pub const MAX_SECURE_FRAME: usize = 65_536;

/// Authentication tag appended by the AEAD cipher
pub const AEAD_TAG_LEN: usize = 16;

/// Maximum payload of a single multiplexer data frame.
///
/// Leaves room for the mux header inside one secure frame.
pub const MAX_MUX_PAYLOAD: usize = MAX_SECURE_FRAME - MUX_HEADER_LEN;

/// Multiplexer frame header: stream id (4) + frame kind (1)
pub const MUX_HEADER_LEN: usize = 5;

/// Maximum negotiation message length (protocol ids are short strings)
pub const MAX_NEGOTIATION_LINE: usize = 1024;

/// Maximum length-prefixed pubsub RPC: 4 MiB
pub const MAX_RPC_SIZE: usize = 4 * 1024 * 1024;

// =============================================================================
// Multiplexer Defaults
// =============================================================================

/// Maximum concurrently open inbound streams per connection
pub const DEFAULT_MAX_STREAMS: usize = 512;

/// Hard cap on unread bytes buffered per stream: 1 MiB
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 1024 * 1024;

/// Outbound frame queue depth per connection
pub const DEFAULT_OUTBOUND_QUEUE: usize = 64;

// =============================================================================
// Timing (milliseconds)
// =============================================================================

/// Dial timeout: 10 seconds
pub const DIAL_TIMEOUT_MS: u64 = 10_000;

/// Secure handshake timeout: 10 seconds
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Stream negotiation timeout: 5 seconds
pub const NEGOTIATION_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// PubSub
// =============================================================================

/// How long a message id stays in the duplicate cache: 2 minutes
pub const SEEN_TTL_MS: u64 = 120_000;

/// Maximum entries in the duplicate cache
pub const SEEN_CAPACITY: usize = 10_000;

/// Queue depth of a pull-based topic subscription
pub const SUBSCRIBER_QUEUE: usize = 64;

// =============================================================================
// Discovery
// =============================================================================

/// Static bootstrap re-emission interval: 60 seconds
pub const BOOTSTRAP_INTERVAL_MS: u64 = 60_000;

/// Local broadcast announcement interval: 20 seconds
pub const LOCAL_BROADCAST_INTERVAL_MS: u64 = 20_000;

/// Pubsub discovery announcement interval: 1 second
pub const GOSSIP_DISCOVERY_INTERVAL_MS: u64 = 1_000;

/// Well-known pubsub discovery topic
pub const GOSSIP_DISCOVERY_TOPIC: &str = "_peer-discovery._p2p._pubsub";

/// Default local broadcast multicast group and port
pub const LOCAL_BROADCAST_GROUP: &str = "239.255.70.77:45777";

// =============================================================================
// Connections
// =============================================================================

/// Maximum simultaneous connections per node
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
