//! Shared encoding helpers.
//!
//! - CBOR encoding of structured payloads (pubsub RPCs, announcements)
//! - Length-prefix framing used on top of logical streams
//!
//! # Length-prefixed Format
//!
//! ```text
//! [length: u32 BE]        # Payload length
//! [payload: bytes]        # Payload
//! ```

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{DecodeError, EncodeError};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

// =============================================================================
// Payload Encoding/Decoding
// =============================================================================

/// Encode a payload to CBOR, rejecting results larger than `max`.
pub fn encode_payload<T: Serialize>(payload: &T, max: usize) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    ciborium::into_writer(payload, &mut buf)?;

    if buf.len() > max {
        return Err(EncodeError::PayloadTooLarge {
            size: buf.len(),
            max,
        });
    }

    Ok(buf)
}

/// Decode a CBOR payload.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    ciborium::from_reader(bytes).map_err(|e| DecodeError::PayloadDecodeFailed(e.to_string()))
}

// =============================================================================
// Length Prefix
// =============================================================================

/// Prepend a 4-byte big-endian length to `data`.
pub fn encode_length_prefixed(data: &[u8], max: usize) -> Result<Vec<u8>, EncodeError> {
    if data.len() > max {
        return Err(EncodeError::PayloadTooLarge {
            size: data.len(),
            max,
        });
    }

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_LEN + data.len());
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
    Ok(buf)
}

/// Read the payload length announced by a prefix, validating it against `max`.
pub fn decode_length_prefix(prefix: [u8; LENGTH_PREFIX_LEN], max: usize) -> Result<usize, DecodeError> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > max {
        return Err(DecodeError::MessageTooLarge { size: len, max });
    }
    Ok(len)
}
