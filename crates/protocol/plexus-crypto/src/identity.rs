//! Identity management
//!
//! Provides Ed25519 keypair generation and PeerId derivation.
//!
//! PeerId is derived from a public key:
//! ```text
//! PeerId = H(0x00 || public_key)[0:20]
//! ```
//!
//! Human-readable format: `plx1` + base58(PeerId)

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::signature::sign;
use crate::{PeerId, PrivateKey, PublicKey, Signature};

/// Domain separator for key hashing (Ed25519 key type)
const DOMAIN_KEY: u8 = 0x00;

/// Human-readable PeerId prefix
const PEER_ID_PREFIX: &str = "plx1";

/// Generate a new Ed25519 identity (keypair).
///
/// Uses the operating system's cryptographically secure random number generator.
///
/// # Example
/// ```
/// use plexus_crypto::generate_identity;
///
/// let (private_key, public_key) = generate_identity();
/// ```
pub fn generate_identity() -> (PrivateKey, PublicKey) {
    let mut csprng = OsRng;
    let signing_key = SigningKey::generate(&mut csprng);
    let verifying_key = signing_key.verifying_key();

    let private_key = PrivateKey::from_signing_key(&signing_key);
    let public_key = PublicKey(verifying_key.to_bytes());

    (private_key, public_key)
}

/// Derive a PeerId from a public key.
///
/// # Algorithm
/// ```text
/// PeerId = H(0x00 || public_key)[0:20]
/// ```
///
/// # Example
/// ```
/// use plexus_crypto::{generate_identity, peer_id_from_public_key};
///
/// let (_, public_key) = generate_identity();
/// let peer_id = peer_id_from_public_key(&public_key);
/// assert_eq!(peer_id.0.len(), 20);
/// ```
pub fn peer_id_from_public_key(public_key: &PublicKey) -> PeerId {
    let mut hasher = Sha256::new();
    hasher.update([DOMAIN_KEY]);
    hasher.update(public_key.0);
    let hash: [u8; 32] = hasher.finalize().into();

    let mut peer_id = [0u8; 20];
    peer_id.copy_from_slice(&hash[..20]);
    PeerId(peer_id)
}

/// Convert a PeerId to its human-readable string format.
///
/// Format: `plx1` + base58(PeerId)
pub fn peer_id_to_string(peer_id: &PeerId) -> String {
    let encoded = bs58::encode(&peer_id.0).into_string();
    format!("{}{}", PEER_ID_PREFIX, encoded)
}

/// Parse a human-readable PeerId string.
///
/// # Errors
/// - `InvalidPeerIdPrefix` if the string doesn't start with `plx1`
/// - `InvalidBase58` if the base58 decoding fails
/// - `InvalidKeyLength` if the decoded data isn't 20 bytes
///
/// # Example
/// ```
/// use plexus_crypto::{peer_id_from_string, peer_id_to_string, Keypair};
///
/// let keypair = Keypair::generate();
/// let encoded = peer_id_to_string(&keypair.peer_id());
/// let decoded = peer_id_from_string(&encoded).unwrap();
/// assert_eq!(keypair.peer_id(), decoded);
/// ```
pub fn peer_id_from_string(s: &str) -> Result<PeerId, CryptoError> {
    if !s.starts_with(PEER_ID_PREFIX) {
        let prefix: String = s.chars().take(4).collect();
        return Err(CryptoError::InvalidPeerIdPrefix(prefix));
    }

    let base58_part = &s[PEER_ID_PREFIX.len()..];
    if base58_part.is_empty() {
        return Err(CryptoError::InvalidPeerIdFormat(
            "Missing data after prefix".to_string(),
        ));
    }

    let decoded = bs58::decode(base58_part)
        .into_vec()
        .map_err(|e| CryptoError::InvalidBase58(e.to_string()))?;

    PeerId::try_from_slice(&decoded)
}

/// A node's long-term identity: the Ed25519 keypair and the PeerId derived from it.
///
/// This is the identity provider handed to the network layer at startup.
#[derive(Clone)]
pub struct Keypair {
    private_key: PrivateKey,
    public_key: PublicKey,
    peer_id: PeerId,
}

impl Keypair {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let (private_key, public_key) = generate_identity();
        Self::from_parts(private_key, public_key)
    }

    /// Derive an identity deterministically from a 32-byte secret.
    ///
    /// The same secret always yields the same PeerId.
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret);
        let public_key = PublicKey(signing_key.verifying_key().to_bytes());
        Self::from_parts(PrivateKey::from_signing_key(&signing_key), public_key)
    }

    fn from_parts(private_key: PrivateKey, public_key: PublicKey) -> Self {
        let peer_id = peer_id_from_public_key(&public_key);
        Self {
            private_key,
            public_key,
            peer_id,
        }
    }

    /// The private half of the keypair.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// The public half of the keypair.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The PeerId derived from the public key.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Sign `message` with this identity.
    pub fn sign(&self, message: &[u8]) -> Signature {
        sign(&self.private_key, message)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify;

    #[test]
    fn test_generate_identity() {
        let (_private_key, public_key) = generate_identity();
        assert_eq!(public_key.0.len(), 32);
    }

    #[test]
    fn test_peer_id_deterministic() {
        let (_, public_key) = generate_identity();
        let id1 = peer_id_from_public_key(&public_key);
        let id2 = peer_id_from_public_key(&public_key);
        assert_eq!(id1.0, id2.0);
    }

    #[test]
    fn test_peer_id_roundtrip() {
        let (_, public_key) = generate_identity();
        let peer_id = peer_id_from_public_key(&public_key);
        let encoded = peer_id_to_string(&peer_id);
        let decoded = peer_id_from_string(&encoded).unwrap();
        assert_eq!(peer_id.0, decoded.0);
    }

    #[test]
    fn test_invalid_prefix() {
        let result = peer_id_from_string("xyz1abc");
        assert!(matches!(result, Err(CryptoError::InvalidPeerIdPrefix(_))));
    }

    #[test]
    fn test_missing_body() {
        let result = peer_id_from_string("plx1");
        assert!(matches!(result, Err(CryptoError::InvalidPeerIdFormat(_))));
    }

    #[test]
    fn test_keypair_from_secret_is_stable() {
        let a = Keypair::from_secret([7u8; 32]);
        let b = Keypair::from_secret([7u8; 32]);
        assert_eq!(a.peer_id(), b.peer_id());
        assert_eq!(a.public_key(), b.public_key());

        let c = Keypair::from_secret([8u8; 32]);
        assert_ne!(a.peer_id(), c.peer_id());
    }

    #[test]
    fn test_keypair_sign_verifies() {
        let keypair = Keypair::generate();
        let signature = keypair.sign(b"announce");
        assert!(verify(keypair.public_key(), b"announce", &signature));
        assert_eq!(keypair.public_key().to_peer_id(), keypair.peer_id());
    }

    #[test]
    fn test_keypair_debug_hides_key() {
        let keypair = Keypair::generate();
        let debug = format!("{:?}", keypair);
        assert!(debug.contains("peer_id"));
        assert!(!debug.contains("private_key"));
    }
}
