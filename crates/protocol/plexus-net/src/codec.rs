//! Message framing over logical streams.
//!
//! Two framings run on top of a [`Stream`]:
//!
//! - 4-byte big-endian length prefix + payload, for protocol payloads such
//!   as pubsub RPCs
//! - 2-byte length prefix + newline-terminated lines, for protocol
//!   negotiation

use plexus_wire::{
    decode_length_prefix, decode_lines, decode_prefix, encode_length_prefixed, encode_lines,
    LENGTH_PREFIX_LEN, NEGOTIATION_PREFIX_LEN,
};

use crate::error::NetworkResult;
use crate::muxer::Stream;

/// Read a length-prefixed message.
///
/// Returns `Ok(None)` when the remote closed the stream at a message
/// boundary.
pub async fn read_length_prefixed(stream: &mut Stream, max: usize) -> NetworkResult<Option<Vec<u8>>> {
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    if !stream.read_exact_or_eof(&mut len_buf).await? {
        return Ok(None);
    }
    let len = decode_length_prefix(len_buf, max)?;

    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await?;
    Ok(Some(data))
}

/// Write a length-prefixed message.
pub async fn write_length_prefixed(stream: &mut Stream, data: &[u8], max: usize) -> NetworkResult<()> {
    let buf = encode_length_prefixed(data, max)?;
    stream.write(&buf).await
}

/// Read one negotiation message as its lines.
pub(crate) async fn read_lines(stream: &mut Stream) -> NetworkResult<Vec<String>> {
    let mut len_buf = [0u8; NEGOTIATION_PREFIX_LEN];
    stream.read_exact(&mut len_buf).await?;
    let mut body = vec![0u8; decode_prefix(len_buf)];
    stream.read_exact(&mut body).await?;
    Ok(decode_lines(&body)?)
}

/// Write one negotiation message.
pub(crate) async fn write_lines<S: AsRef<str>>(stream: &mut Stream, lines: &[S]) -> NetworkResult<()> {
    let buf = encode_lines(lines)?;
    stream.write(&buf).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::test_support::stream_pair;

    #[tokio::test]
    async fn test_length_prefixed_roundtrip() {
        let (_d, _l, mut outbound, mut inbound) = stream_pair().await;

        write_length_prefixed(&mut outbound, b"hello world", 1024)
            .await
            .unwrap();
        write_length_prefixed(&mut outbound, b"", 1024).await.unwrap();
        outbound.close_write().await.unwrap();

        assert_eq!(
            read_length_prefixed(&mut inbound, 1024).await.unwrap(),
            Some(b"hello world".to_vec())
        );
        assert_eq!(
            read_length_prefixed(&mut inbound, 1024).await.unwrap(),
            Some(Vec::new())
        );
        assert_eq!(read_length_prefixed(&mut inbound, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let (_d, _l, mut outbound, mut inbound) = stream_pair().await;

        let result = write_length_prefixed(&mut outbound, &[0u8; 65], 64).await;
        assert!(matches!(result, Err(NetworkError::Encoding(_))));

        write_length_prefixed(&mut outbound, &[0u8; 65], 1024)
            .await
            .unwrap();
        let result = read_length_prefixed(&mut inbound, 64).await;
        assert!(matches!(result, Err(NetworkError::Decoding(_))));
    }

    #[tokio::test]
    async fn test_truncated_message_is_an_error() {
        let (_d, _l, mut outbound, mut inbound) = stream_pair().await;

        // Announce 10 bytes, send 3, close.
        outbound.write(&[0, 0, 0, 10, 1, 2, 3]).await.unwrap();
        outbound.close_write().await.unwrap();

        assert!(matches!(
            read_length_prefixed(&mut inbound, 1024).await,
            Err(NetworkError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_lines_roundtrip() {
        let (_d, _l, mut outbound, mut inbound) = stream_pair().await;

        write_lines(&mut outbound, &["/multistream/1.0.0"]).await.unwrap();
        write_lines(&mut outbound, &["/a/1.0.0", "/b"]).await.unwrap();

        assert_eq!(
            read_lines(&mut inbound).await.unwrap(),
            vec!["/multistream/1.0.0"]
        );
        assert_eq!(read_lines(&mut inbound).await.unwrap(), vec!["/a/1.0.0", "/b"]);
    }
}
