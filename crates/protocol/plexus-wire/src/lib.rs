//! Wire codecs for the Plexus overlay.
//!
//! Pure byte-level encoding with no I/O. The networking crate reads and
//! writes these formats over sockets and logical streams.
//!
//! # Module Organization
//!
//! - [`handshake`] - Secure-channel hello and cipher suite selection
//! - [`frame`] - Multiplexer frames
//! - [`negotiation`] - Multistream-style negotiation lines
//! - [`rpc`] - Flood pubsub RPC (CBOR)
//! - [`announce`] - Signed discovery announcements (CBOR)
//! - [`encoding`] - CBOR and length-prefix helpers
//! - [`error`] - Encoding and decoding errors

pub mod announce;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod negotiation;
pub mod rpc;

pub use announce::{PeerAnnouncement, VerifiedAnnouncement, MAX_ANNOUNCEMENT_SIZE};
pub use encoding::{
    decode_length_prefix, decode_payload, encode_length_prefixed, encode_payload,
    LENGTH_PREFIX_LEN,
};
pub use error::{DecodeError, EncodeError};
pub use frame::{FrameKind, MuxFrame, StreamId};
pub use handshake::{select_suite, CipherSuite, Hello, HELLO_FIXED_LEN};
pub use negotiation::{
    decode_line, decode_lines, decode_prefix, encode_line, encode_lines, MAX_NEGOTIATION_MESSAGE,
    NEGOTIATION_PREFIX_LEN,
};
pub use rpc::{Rpc, RpcMessage, SubOpts};
