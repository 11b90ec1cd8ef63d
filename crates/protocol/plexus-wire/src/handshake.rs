//! Secure-channel hello message.
//!
//! Each side opens the secure channel by sending one hello. The hello binds a
//! fresh X25519 ephemeral key to the sender's long-term Ed25519 identity.
//!
//! # Hello Format
//!
//! ```text
//! [magic: 0x50]                 # 1 byte
//! [version: u8]                 # 1 byte
//! [ephemeral_key: 32 bytes]     # X25519 public key
//! [identity_key: 32 bytes]      # Ed25519 public key
//! [signature: 64 bytes]         # Signs HELLO_DOMAIN || ephemeral_key
//! [suite_count: u8]
//! [suites: u16 BE * suite_count]
//! ```

use plexus_crypto::{verify, Keypair, PeerId, PublicKey, Signature};
use plexus_types::{HANDSHAKE_MAGIC, HANDSHAKE_VERSION};

use crate::error::DecodeError;

/// Domain separator for hello signatures.
const HELLO_DOMAIN: &[u8] = b"plexus-hello:";

/// Size of the fixed portion of a hello (everything before the suite list).
pub const HELLO_FIXED_LEN: usize = 1 + 1 + 32 + 32 + 64 + 1;

/// Cipher suites understood by the secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CipherSuite {
    /// X25519 key agreement, SHA-256 key derivation, AES-256-GCM frames.
    X25519Aes256Gcm = 0x0001,
}

impl CipherSuite {
    /// All suites this build supports, in order of preference.
    pub const ALL: &'static [CipherSuite] = &[CipherSuite::X25519Aes256Gcm];

    /// Wire code of the suite.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Look up a suite by wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0001 => Some(CipherSuite::X25519Aes256Gcm),
            _ => None,
        }
    }
}

/// Pick the first of `local` (preference order) that the remote also offers.
pub fn select_suite(local: &[CipherSuite], remote_codes: &[u16]) -> Option<CipherSuite> {
    local
        .iter()
        .copied()
        .find(|suite| remote_codes.contains(&suite.code()))
}

/// A decoded hello.
///
/// Suite codes are kept raw so that peers offering suites we do not know
/// still decode cleanly; the intersection is computed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub ephemeral_key: [u8; 32],
    pub identity_key: PublicKey,
    pub signature: Signature,
    pub suites: Vec<u16>,
}

impl Hello {
    /// Build a hello signed by `identity`.
    pub fn new(identity: &Keypair, ephemeral_key: [u8; 32], suites: &[CipherSuite]) -> Self {
        let signature = identity.sign(&signing_bytes(&ephemeral_key));
        Self {
            ephemeral_key,
            identity_key: *identity.public_key(),
            signature,
            suites: suites.iter().map(|s| s.code()).collect(),
        }
    }

    /// Check the signature over the ephemeral key.
    pub fn verify(&self) -> bool {
        verify(
            &self.identity_key,
            &signing_bytes(&self.ephemeral_key),
            &self.signature,
        )
    }

    /// PeerId of the sender's identity key.
    pub fn peer_id(&self) -> PeerId {
        self.identity_key.to_peer_id()
    }

    /// Encode to the wire format.
    pub fn encode(&self) -> Vec<u8> {
        let suites = &self.suites[..self.suites.len().min(u8::MAX as usize)];
        let mut buf = Vec::with_capacity(HELLO_FIXED_LEN + suites.len() * 2);
        buf.push(HANDSHAKE_MAGIC);
        buf.push(HANDSHAKE_VERSION);
        buf.extend_from_slice(&self.ephemeral_key);
        buf.extend_from_slice(self.identity_key.as_bytes());
        buf.extend_from_slice(self.signature.as_bytes());
        buf.push(suites.len() as u8);
        for code in suites {
            buf.extend_from_slice(&code.to_be_bytes());
        }
        buf
    }

    /// Decode from the wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HELLO_FIXED_LEN {
            return Err(DecodeError::TruncatedMessage {
                expected: HELLO_FIXED_LEN,
                got: bytes.len(),
            });
        }

        if bytes[0] != HANDSHAKE_MAGIC {
            return Err(DecodeError::InvalidMagic {
                expected: HANDSHAKE_MAGIC,
                got: bytes[0],
            });
        }
        if bytes[1] != HANDSHAKE_VERSION {
            return Err(DecodeError::InvalidVersion {
                expected: HANDSHAKE_VERSION,
                got: bytes[1],
            });
        }

        let mut cursor = 2;
        let mut ephemeral_key = [0u8; 32];
        ephemeral_key.copy_from_slice(&bytes[cursor..cursor + 32]);
        cursor += 32;

        let mut identity = [0u8; 32];
        identity.copy_from_slice(&bytes[cursor..cursor + 32]);
        cursor += 32;

        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[cursor..cursor + 64]);
        cursor += 64;

        let count = bytes[cursor] as usize;
        cursor += 1;

        let expected = HELLO_FIXED_LEN + count * 2;
        if bytes.len() != expected {
            return Err(DecodeError::TruncatedMessage {
                expected,
                got: bytes.len(),
            });
        }

        let suites = bytes[cursor..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();

        Ok(Self {
            ephemeral_key,
            identity_key: PublicKey::from_bytes(identity),
            signature: Signature::from_bytes(signature),
            suites,
        })
    }
}

fn signing_bytes(ephemeral_key: &[u8; 32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HELLO_DOMAIN.len() + 32);
    buf.extend_from_slice(HELLO_DOMAIN);
    buf.extend_from_slice(ephemeral_key);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Keypair, Hello) {
        let identity = Keypair::generate();
        let hello = Hello::new(&identity, [7u8; 32], CipherSuite::ALL);
        (identity, hello)
    }

    #[test]
    fn test_hello_layout() {
        let (identity, hello) = sample();
        let bytes = hello.encode();

        assert_eq!(bytes.len(), HELLO_FIXED_LEN + 2);
        assert_eq!(bytes[0], HANDSHAKE_MAGIC);
        assert_eq!(bytes[1], HANDSHAKE_VERSION);
        assert_eq!(&bytes[2..34], &[7u8; 32]);
        assert_eq!(&bytes[34..66], identity.public_key().as_bytes());
        assert_eq!(bytes[130], 1);
        assert_eq!(&bytes[131..133], &[0x00, 0x01]);
    }

    #[test]
    fn test_hello_decode_verifies() {
        let (identity, hello) = sample();
        let decoded = Hello::decode(&hello.encode()).unwrap();
        assert_eq!(decoded, hello);
        assert!(decoded.verify());
        assert_eq!(decoded.peer_id(), identity.peer_id());
    }

    #[test]
    fn test_tampered_ephemeral_fails_verification() {
        let (_, hello) = sample();
        let mut bytes = hello.encode();
        bytes[2] ^= 0xff;
        let decoded = Hello::decode(&bytes).unwrap();
        assert!(!decoded.verify());
    }

    #[test]
    fn test_substituted_identity_fails_verification() {
        let (_, mut hello) = sample();
        hello.identity_key = *Keypair::generate().public_key();
        assert!(!hello.verify());
    }

    #[test]
    fn test_decode_errors() {
        let (_, hello) = sample();
        let bytes = hello.encode();

        assert!(matches!(
            Hello::decode(&bytes[..10]),
            Err(DecodeError::TruncatedMessage { .. })
        ));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = 0x00;
        assert!(matches!(
            Hello::decode(&bad_magic),
            Err(DecodeError::InvalidMagic { got: 0x00, .. })
        ));

        let mut bad_version = bytes.clone();
        bad_version[1] = 9;
        assert!(matches!(
            Hello::decode(&bad_version),
            Err(DecodeError::InvalidVersion { got: 9, .. })
        ));

        let mut short_suites = bytes;
        short_suites.pop();
        assert!(matches!(
            Hello::decode(&short_suites),
            Err(DecodeError::TruncatedMessage { .. })
        ));
    }

    #[test]
    fn test_unknown_suites_survive_decode() {
        let (_, mut hello) = sample();
        hello.suites = vec![0xbeef, 0x0001];
        let decoded = Hello::decode(&hello.encode()).unwrap();
        assert_eq!(decoded.suites, vec![0xbeef, 0x0001]);
        assert_eq!(
            select_suite(CipherSuite::ALL, &decoded.suites),
            Some(CipherSuite::X25519Aes256Gcm)
        );
    }

    #[test]
    fn test_no_common_suite() {
        assert_eq!(select_suite(CipherSuite::ALL, &[0xbeef]), None);
        assert_eq!(select_suite(CipherSuite::ALL, &[]), None);
        assert_eq!(CipherSuite::from_code(0xbeef), None);
    }
}
