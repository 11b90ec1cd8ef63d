//! Domain-separated hashing.
//!
//! Two hashes are defined:
//! ```text
//! ContentHash(payload)      = H(0x01 || len(payload) as u64be || payload)
//! MessageId(origin, seqno)  = H(0x02 || origin || seqno as u64be)
//! ```
//!
//! Both are used by the pubsub layer to identify messages for duplicate
//! suppression; which one applies depends on the router's configuration.

use sha2::{Digest, Sha256};

use crate::{Hash, PeerId};

/// Domain separator for payload hashing.
/// Must differ from DOMAIN_KEY (0x00) in identity.rs.
const DOMAIN_CONTENT: u8 = 0x01;

/// Domain separator for origin/sequence message ids.
const DOMAIN_MESSAGE: u8 = 0x02;

/// Compute the content hash of the given bytes.
///
/// # Example
/// ```
/// use plexus_crypto::content_hash;
///
/// let hash = content_hash(b"Bird bird bird, bird is the word!");
/// assert_eq!(hash.0.len(), 32);
/// ```
pub fn content_hash(content: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([DOMAIN_CONTENT]);
    hasher.update((content.len() as u64).to_be_bytes());
    hasher.update(content);

    let result: [u8; 32] = hasher.finalize().into();
    Hash(result)
}

/// Compute the id of a message from its origin and the origin's sequence number.
///
/// # Example
/// ```
/// use plexus_crypto::{message_id, PeerId};
///
/// let origin = PeerId::from_bytes([1u8; 20]);
/// assert_eq!(message_id(&origin, 7), message_id(&origin, 7));
/// assert_ne!(message_id(&origin, 7), message_id(&origin, 8));
/// ```
pub fn message_id(origin: &PeerId, seqno: u64) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([DOMAIN_MESSAGE]);
    hasher.update(origin.0);
    hasher.update(seqno.to_be_bytes());

    let result: [u8; 32] = hasher.finalize().into();
    Hash(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_deterministic() {
        let content = b"test";
        assert_eq!(content_hash(content).0, content_hash(content).0);
    }

    #[test]
    fn test_content_hash_different_inputs() {
        let hash1 = content_hash(b"test1");
        let hash2 = content_hash(b"test2");
        assert_ne!(hash1.0, hash2.0);
    }

    #[test]
    fn test_message_id_depends_on_origin() {
        let a = PeerId([1u8; 20]);
        let b = PeerId([2u8; 20]);
        assert_ne!(message_id(&a, 1), message_id(&b, 1));
    }

    #[test]
    fn test_domains_do_not_collide() {
        // Same 28 input bytes through both hashes must differ.
        let origin = PeerId([0u8; 20]);
        let by_origin = message_id(&origin, 0);
        let by_content = content_hash(&[0u8; 20]);
        assert_ne!(by_origin, by_content);
    }
}
