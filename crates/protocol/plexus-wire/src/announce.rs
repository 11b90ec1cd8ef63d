//! Signed peer announcements.
//!
//! Used by the local-broadcast and pubsub discovery strategies. The
//! announcement carries the announcer's public key so receivers can derive
//! and authenticate the PeerId without prior contact.

use plexus_crypto::{verify, Keypair, PeerId, PublicKey, Signature};
use plexus_types::Multiaddr;
use serde::{Deserialize, Serialize};

use crate::encoding::{decode_payload, encode_payload};
use crate::error::{DecodeError, EncodeError};
use crate::rpc::byte_buf;

/// Domain separator for announcement signatures.
const ANNOUNCE_DOMAIN: &[u8] = b"plexus-announce:";

/// Announcements are small; anything larger is rejected.
pub const MAX_ANNOUNCEMENT_SIZE: usize = 8 * 1024;

/// A self-announcement: identity key, reachable addresses, signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAnnouncement {
    pub public_key: PublicKey,
    pub addresses: Vec<String>,
    #[serde(with = "byte_buf")]
    pub signature: Vec<u8>,
}

/// The authenticated content of an announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAnnouncement {
    pub peer: PeerId,
    pub addresses: Vec<Multiaddr>,
}

impl PeerAnnouncement {
    /// Build and sign an announcement for `identity`.
    pub fn new(identity: &Keypair, addresses: &[Multiaddr]) -> Self {
        let addresses: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
        let signature = identity.sign(&signing_bytes(identity.public_key(), &addresses));
        Self {
            public_key: *identity.public_key(),
            addresses,
            signature: signature.as_bytes().to_vec(),
        }
    }

    /// Check the signature and parse the addresses.
    pub fn verify(&self) -> Result<VerifiedAnnouncement, DecodeError> {
        let signature: [u8; 64] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| DecodeError::InvalidSignature)?;

        if !verify(
            &self.public_key,
            &signing_bytes(&self.public_key, &self.addresses),
            &Signature::from_bytes(signature),
        ) {
            return Err(DecodeError::InvalidSignature);
        }

        let addresses = self
            .addresses
            .iter()
            .map(|a| {
                a.parse::<Multiaddr>()
                    .map_err(|e| DecodeError::InvalidAddress(format!("{}: {}", a, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(VerifiedAnnouncement {
            peer: self.public_key.to_peer_id(),
            addresses,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode_payload(self, MAX_ANNOUNCEMENT_SIZE)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() > MAX_ANNOUNCEMENT_SIZE {
            return Err(DecodeError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_ANNOUNCEMENT_SIZE,
            });
        }
        decode_payload(bytes)
    }
}

fn signing_bytes(public_key: &PublicKey, addresses: &[String]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(ANNOUNCE_DOMAIN);
    buf.extend_from_slice(public_key.as_bytes());
    buf.extend_from_slice(&(addresses.len() as u32).to_be_bytes());
    for addr in addresses {
        buf.extend_from_slice(&(addr.len() as u32).to_be_bytes());
        buf.extend_from_slice(addr.as_bytes());
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> Vec<Multiaddr> {
        vec![
            "/ip4/192.168.1.20/tcp/4001".parse().unwrap(),
            "/memory/9".parse().unwrap(),
        ]
    }

    #[test]
    fn test_announcement_verifies() {
        let identity = Keypair::generate();
        let announcement = PeerAnnouncement::new(&identity, &addrs());

        let decoded = PeerAnnouncement::decode(&announcement.encode().unwrap()).unwrap();
        let verified = decoded.verify().unwrap();
        assert_eq!(verified.peer, identity.peer_id());
        assert_eq!(verified.addresses, addrs());
    }

    #[test]
    fn test_injected_address_rejected() {
        let identity = Keypair::generate();
        let mut announcement = PeerAnnouncement::new(&identity, &addrs());
        announcement.addresses.push("/ip4/6.6.6.6/tcp/1".to_string());
        assert_eq!(announcement.verify(), Err(DecodeError::InvalidSignature));
    }

    #[test]
    fn test_foreign_key_rejected() {
        let identity = Keypair::generate();
        let mut announcement = PeerAnnouncement::new(&identity, &addrs());
        announcement.public_key = *Keypair::generate().public_key();
        assert_eq!(announcement.verify(), Err(DecodeError::InvalidSignature));
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let identity = Keypair::generate();
        let mut announcement = PeerAnnouncement::new(&identity, &addrs());
        announcement.signature.truncate(10);
        assert_eq!(announcement.verify(), Err(DecodeError::InvalidSignature));
    }

    #[test]
    fn test_empty_address_list() {
        let identity = Keypair::generate();
        let verified = PeerAnnouncement::new(&identity, &[]).verify().unwrap();
        assert!(verified.addresses.is_empty());
    }
}
