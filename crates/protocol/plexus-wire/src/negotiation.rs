//! Stream negotiation messages.
//!
//! Negotiation runs over a fresh stream before any application bytes. Each
//! message is one or more newline-terminated UTF-8 lines behind a 2-byte
//! length:
//!
//! ```text
//! [length: u16 BE]
//! [line "\n"]...        # One line per message, except the `ls` reply
//! ```
//!
//! A single line carries the multistream header, a protocol proposal, its
//! echo, `na` or `ls`. The reply to `ls` carries one protocol per line.

use plexus_types::MAX_NEGOTIATION_LINE;

use crate::error::{DecodeError, EncodeError};

/// Size of the negotiation length prefix.
pub const NEGOTIATION_PREFIX_LEN: usize = 2;

/// Largest body a negotiation message may announce.
pub const MAX_NEGOTIATION_MESSAGE: usize = u16::MAX as usize;

/// Encode a single-line message.
pub fn encode_line(line: &str) -> Result<Vec<u8>, EncodeError> {
    encode_lines(&[line])
}

/// Encode a multi-line message.
pub fn encode_lines<S: AsRef<str>>(lines: &[S]) -> Result<Vec<u8>, EncodeError> {
    let mut body = Vec::new();
    for line in lines {
        let line = line.as_ref();
        if line.contains('\n') {
            return Err(EncodeError::InvalidLine(line.to_string()));
        }
        if line.len() > MAX_NEGOTIATION_LINE {
            return Err(EncodeError::InvalidLine(format!(
                "line of {} bytes exceeds {}",
                line.len(),
                MAX_NEGOTIATION_LINE
            )));
        }
        body.extend_from_slice(line.as_bytes());
        body.push(b'\n');
    }

    if body.len() > MAX_NEGOTIATION_MESSAGE {
        return Err(EncodeError::PayloadTooLarge {
            size: body.len(),
            max: MAX_NEGOTIATION_MESSAGE,
        });
    }

    let mut buf = Vec::with_capacity(NEGOTIATION_PREFIX_LEN + body.len());
    buf.extend_from_slice(&(body.len() as u16).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Body length announced by a prefix.
pub fn decode_prefix(prefix: [u8; NEGOTIATION_PREFIX_LEN]) -> usize {
    u16::from_be_bytes(prefix) as usize
}

/// Split a message body into its lines.
pub fn decode_lines(body: &[u8]) -> Result<Vec<String>, DecodeError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let text = std::str::from_utf8(body).map_err(|e| DecodeError::InvalidLine(e.to_string()))?;

    let Some(text) = text.strip_suffix('\n') else {
        return Err(DecodeError::InvalidLine(
            "message is not newline-terminated".to_string(),
        ));
    };

    text.split('\n')
        .map(|line| {
            if line.len() > MAX_NEGOTIATION_LINE {
                Err(DecodeError::MessageTooLarge {
                    size: line.len(),
                    max: MAX_NEGOTIATION_LINE,
                })
            } else {
                Ok(line.to_string())
            }
        })
        .collect()
}

/// Decode a message that must hold exactly one line.
pub fn decode_line(body: &[u8]) -> Result<String, DecodeError> {
    let mut lines = decode_lines(body)?;
    if lines.len() != 1 {
        return Err(DecodeError::InvalidLine(format!(
            "expected one line, got {}",
            lines.len()
        )));
    }
    Ok(lines.remove(0))
}
