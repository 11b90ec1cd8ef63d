//! Multiplexer frames.
//!
//! Every multiplexer frame travels as exactly one secure-channel message.
//!
//! ```text
//! [stream_id: u32 BE]   # 4 bytes
//! [kind: u8]            # Open / Data / Close / Reset / WindowUpdate
//! [payload: bytes]      # Data bytes, or a u32 BE credit for WindowUpdate
//! ```

use plexus_types::{MAX_MUX_PAYLOAD, MUX_HEADER_LEN};

use crate::error::{DecodeError, EncodeError};

/// Logical stream identifier, unique per connection.
///
/// The dialing side allocates odd ids and the listening side even ids, so both
/// ends can open streams without coordination.
pub type StreamId = u32;

/// Kind of multiplexer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Open a new stream.
    Open = 0x00,
    /// Carry stream bytes.
    Data = 0x01,
    /// Half-close: the sender will write no more.
    Close = 0x02,
    /// Abort the stream in both directions.
    Reset = 0x03,
    /// Grant the remote more send credit on the stream.
    WindowUpdate = 0x04,
}

impl TryFrom<u8> for FrameKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(FrameKind::Open),
            0x01 => Ok(FrameKind::Data),
            0x02 => Ok(FrameKind::Close),
            0x03 => Ok(FrameKind::Reset),
            0x04 => Ok(FrameKind::WindowUpdate),
            other => Err(DecodeError::InvalidFrameKind(other)),
        }
    }
}

/// A decoded multiplexer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxFrame {
    pub stream_id: StreamId,
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl MuxFrame {
    pub fn open(stream_id: StreamId) -> Self {
        Self::control(stream_id, FrameKind::Open)
    }

    pub fn data(stream_id: StreamId, payload: Vec<u8>) -> Self {
        Self {
            stream_id,
            kind: FrameKind::Data,
            payload,
        }
    }

    pub fn close(stream_id: StreamId) -> Self {
        Self::control(stream_id, FrameKind::Close)
    }

    pub fn reset(stream_id: StreamId) -> Self {
        Self::control(stream_id, FrameKind::Reset)
    }

    /// Allow the remote to send `credit` more bytes on the stream.
    pub fn window_update(stream_id: StreamId, credit: u32) -> Self {
        Self {
            stream_id,
            kind: FrameKind::WindowUpdate,
            payload: credit.to_be_bytes().to_vec(),
        }
    }

    /// The credit carried by a `WindowUpdate` frame.
    pub fn credit(&self) -> Result<u32, DecodeError> {
        let bytes: [u8; 4] =
            self.payload
                .as_slice()
                .try_into()
                .map_err(|_| DecodeError::TruncatedMessage {
                    expected: 4,
                    got: self.payload.len(),
                })?;
        Ok(u32::from_be_bytes(bytes))
    }

    fn control(stream_id: StreamId, kind: FrameKind) -> Self {
        Self {
            stream_id,
            kind,
            payload: Vec::new(),
        }
    }

    /// Encode to bytes. Data payloads must fit in one secure frame.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        if self.payload.len() > MAX_MUX_PAYLOAD {
            return Err(EncodeError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_MUX_PAYLOAD,
            });
        }

        let mut buf = Vec::with_capacity(MUX_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.stream_id.to_be_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decode from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < MUX_HEADER_LEN {
            return Err(DecodeError::TruncatedMessage {
                expected: MUX_HEADER_LEN,
                got: bytes.len(),
            });
        }

        let stream_id = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let kind = FrameKind::try_from(bytes[4])?;

        Ok(Self {
            stream_id,
            kind,
            payload: bytes[MUX_HEADER_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_frame_layout() {
        let frame = MuxFrame::data(0x0102_0304, b"abc".to_vec());
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes, vec![0x01, 0x02, 0x03, 0x04, 0x01, b'a', b'b', b'c']);
        assert_eq!(MuxFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_control_frames_have_no_payload() {
        for (frame, kind) in [
            (MuxFrame::open(1), FrameKind::Open),
            (MuxFrame::close(1), FrameKind::Close),
            (MuxFrame::reset(1), FrameKind::Reset),
        ] {
            let bytes = frame.encode().unwrap();
            assert_eq!(bytes.len(), MUX_HEADER_LEN);
            assert_eq!(bytes[4], kind as u8);
        }
    }

    #[test]
    fn test_window_update_carries_credit() {
        let frame = MuxFrame::window_update(7, 0x0001_0000);
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 7, 0x04, 0x00, 0x01, 0x00, 0x00]);

        let decoded = MuxFrame::decode(&bytes).unwrap();
        assert_eq!(decoded.kind, FrameKind::WindowUpdate);
        assert_eq!(decoded.credit().unwrap(), 0x0001_0000);
        assert!(MuxFrame::open(7).credit().is_err());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let frame = MuxFrame::data(3, vec![0u8; MAX_MUX_PAYLOAD + 1]);
        assert!(matches!(
            frame.encode(),
            Err(EncodeError::PayloadTooLarge { .. })
        ));
        assert!(MuxFrame::data(3, vec![0u8; MAX_MUX_PAYLOAD]).encode().is_ok());
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            MuxFrame::decode(&[0, 0, 1]),
            Err(DecodeError::TruncatedMessage { expected: 5, got: 3 })
        ));
        assert_eq!(
            MuxFrame::decode(&[0, 0, 0, 1, 0x09]),
            Err(DecodeError::InvalidFrameKind(0x09))
        );
    }
}
