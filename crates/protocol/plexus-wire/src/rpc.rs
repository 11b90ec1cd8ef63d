//! Flood pubsub RPC.
//!
//! One RPC is sent per length-prefixed frame on the `/floodsub/1.0.0` stream.
//! It may carry subscription changes, messages, or both.

use plexus_crypto::PeerId;
use plexus_types::{Topic, MAX_RPC_SIZE};
use serde::{Deserialize, Serialize};

use crate::encoding::{decode_payload, encode_payload};
use crate::error::{DecodeError, EncodeError};

/// A pubsub RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rpc {
    #[serde(default)]
    pub subscriptions: Vec<SubOpts>,
    #[serde(default)]
    pub messages: Vec<RpcMessage>,
}

/// A subscription change for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubOpts {
    pub subscribe: bool,
    pub topic: Topic,
}

/// A published message as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcMessage {
    /// Originating peer (not the forwarding peer).
    pub from: PeerId,
    /// Origin-assigned sequence number.
    pub seqno: u64,
    pub topic: Topic,
    #[serde(with = "byte_buf")]
    pub data: Vec<u8>,
}

impl Rpc {
    /// An RPC announcing the given subscription state.
    pub fn subscriptions<I>(topics: I, subscribe: bool) -> Self
    where
        I: IntoIterator<Item = Topic>,
    {
        Self {
            subscriptions: topics
                .into_iter()
                .map(|topic| SubOpts { subscribe, topic })
                .collect(),
            messages: Vec::new(),
        }
    }

    /// An RPC carrying a single message.
    pub fn message(message: RpcMessage) -> Self {
        Self {
            subscriptions: Vec::new(),
            messages: vec![message],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty() && self.messages.is_empty()
    }

    /// Encode to CBOR.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode_payload(self, MAX_RPC_SIZE)
    }

    /// Decode from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() > MAX_RPC_SIZE {
            return Err(DecodeError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_RPC_SIZE,
            });
        }
        decode_payload(bytes)
    }
}

/// Serialize `Vec<u8>` as a CBOR byte string rather than an integer array.
pub(crate) mod byte_buf {
    use std::fmt;

    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        deserializer.deserialize_byte_buf(ByteBufVisitor)
    }

    struct ByteBufVisitor;

    impl<'de> Visitor<'de> for ByteBufVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element()? {
                out.push(byte);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_crypto::Keypair;

    fn sample_message() -> RpcMessage {
        RpcMessage {
            from: Keypair::generate().peer_id(),
            seqno: 42,
            topic: Topic::from("news"),
            data: b"Bird bird bird, bird is the word!".to_vec(),
        }
    }

    #[test]
    fn test_message_rpc_roundtrip() {
        let rpc = Rpc::message(sample_message());
        let decoded = Rpc::decode(&rpc.encode().unwrap()).unwrap();
        assert_eq!(decoded, rpc);
        assert!(decoded.subscriptions.is_empty());
    }

    #[test]
    fn test_subscription_snapshot() {
        let rpc = Rpc::subscriptions([Topic::from("a"), Topic::from("b")], true);
        assert_eq!(rpc.subscriptions.len(), 2);
        assert!(rpc.subscriptions.iter().all(|s| s.subscribe));
        assert!(!rpc.is_empty());
        assert!(Rpc::default().is_empty());
    }

    #[test]
    fn test_data_is_a_byte_string() {
        let message = sample_message();
        let len = message.data.len();
        let rpc = Rpc::message(message);
        let encoded = rpc.encode().unwrap();
        let needle = b"Bird bird bird, bird is the word!";
        assert!(encoded.windows(len).any(|w| w == needle));
    }

    #[test]
    fn test_missing_fields_default() {
        // An RPC with only `messages` omitted.
        let mut buf = Vec::new();
        let value = ciborium::Value::Map(vec![(
            ciborium::Value::Text("subscriptions".into()),
            ciborium::Value::Array(vec![]),
        )]);
        ciborium::into_writer(&value, &mut buf).unwrap();
        let rpc = Rpc::decode(&buf).unwrap();
        assert!(rpc.is_empty());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            Rpc::decode(&[0x13, 0x37]),
            Err(DecodeError::PayloadDecodeFailed(_))
        ));
    }
}
