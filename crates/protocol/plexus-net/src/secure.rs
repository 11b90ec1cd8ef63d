//! Secure channel.
//!
//! Upgrades a raw transport connection into an authenticated, encrypted
//! message session. The upgrade is pluggable through [`SecurityUpgrade`];
//! [`SignedX25519Upgrade`] is the default.
//!
//! # Handshake
//!
//! Both sides send a [`Hello`] and then read the peer's:
//!
//! ```text
//! [length: u16 BE][hello]
//! ```
//!
//! The hello signs a fresh X25519 key with the long-term Ed25519 identity.
//! Each side verifies the signature, derives the remote PeerId, checks it
//! against the expected peer when dialing, and picks the first common cipher
//! suite.
//!
//! # Frames
//!
//! ```text
//! [length: u32 BE]                 # Ciphertext length
//! [ciphertext: AES-256-GCM]        # Plaintext <= 64 KiB, 16-byte tag
//! ```
//!
//! Nonces are per-direction counters, so frames cannot be replayed or
//! reordered without failing authentication.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use plexus_crypto::{Keypair, PeerId, PublicKey};
use plexus_types::{AEAD_TAG_LEN, MAX_SECURE_FRAME};
use plexus_wire::{select_suite, CipherSuite, Hello, HELLO_FIXED_LEN};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, trace};
use x25519_dalek::{EphemeralSecret, PublicKey as EphemeralPublic};

use crate::error::{HandshakeError, NetworkError, NetworkResult};
use crate::transport::BoxedIo;

/// Largest hello we accept (fixed part plus 255 suite codes).
const MAX_HELLO_LEN: usize = HELLO_FIXED_LEN + u8::MAX as usize * 2;

const KEY_LABEL_LOW_TO_HIGH: &[u8] = b"plexus-key:low->high";
const KEY_LABEL_HIGH_TO_LOW: &[u8] = b"plexus-key:high->low";

/// Turns a raw connection into a [`SecureSession`].
#[async_trait]
pub trait SecurityUpgrade: Send + Sync + 'static {
    /// Run the handshake.
    ///
    /// When `expected_peer` is set (dialing), a remote with any other
    /// identity fails with `PeerIdMismatch`.
    async fn secure(
        &self,
        io: BoxedIo,
        identity: &Keypair,
        expected_peer: Option<PeerId>,
    ) -> NetworkResult<SecureSession>;
}

/// Signed X25519 key agreement with AES-256-GCM frames.
#[derive(Debug, Clone)]
pub struct SignedX25519Upgrade {
    suites: Vec<CipherSuite>,
}

impl Default for SignedX25519Upgrade {
    fn default() -> Self {
        Self {
            suites: CipherSuite::ALL.to_vec(),
        }
    }
}

impl SignedX25519Upgrade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the offered suites, in preference order.
    pub fn with_suites(mut self, suites: Vec<CipherSuite>) -> Self {
        self.suites = suites;
        self
    }
}

fn malformed(e: impl std::fmt::Display) -> NetworkError {
    HandshakeError::Malformed(e.to_string()).into()
}

async fn write_hello(io: &mut WriteHalf<BoxedIo>, hello: &Hello) -> NetworkResult<()> {
    let bytes = hello.encode();
    let mut buf = Vec::with_capacity(2 + bytes.len());
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(&bytes);
    io.write_all(&buf).await.map_err(malformed)?;
    io.flush().await.map_err(malformed)
}

async fn read_hello(io: &mut ReadHalf<BoxedIo>) -> NetworkResult<Hello> {
    let mut len = [0u8; 2];
    io.read_exact(&mut len).await.map_err(malformed)?;
    let len = u16::from_be_bytes(len) as usize;
    if len > MAX_HELLO_LEN {
        return Err(malformed(format!("hello of {} bytes", len)));
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await.map_err(malformed)?;
    Hello::decode(&buf).map_err(malformed)
}

fn derive_key(shared: &[u8], low: &[u8; 32], high: &[u8; 32], label: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared);
    hasher.update(low);
    hasher.update(high);
    hasher.update(label);
    hasher.finalize().into()
}

fn cipher(key: &[u8; 32]) -> NetworkResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key).map_err(malformed)
}

#[async_trait]
impl SecurityUpgrade for SignedX25519Upgrade {
    async fn secure(
        &self,
        io: BoxedIo,
        identity: &Keypair,
        expected_peer: Option<PeerId>,
    ) -> NetworkResult<SecureSession> {
        let (mut reader, mut writer) = tokio::io::split(io);

        let secret = EphemeralSecret::random_from_rng(OsRng);
        let local_ephemeral = EphemeralPublic::from(&secret).to_bytes();

        let hello = Hello::new(identity, local_ephemeral, &self.suites);
        write_hello(&mut writer, &hello).await?;
        let remote = read_hello(&mut reader).await?;

        if !remote.verify() {
            return Err(HandshakeError::AuthenticationFailed.into());
        }

        let remote_peer = remote.peer_id();
        if let Some(expected) = expected_peer {
            if expected != remote_peer {
                return Err(HandshakeError::PeerIdMismatch {
                    expected,
                    actual: remote_peer,
                }
                .into());
            }
        }

        let suite = select_suite(&self.suites, &remote.suites)
            .ok_or(HandshakeError::UnsupportedCipherSuite)?;

        if remote.ephemeral_key == local_ephemeral {
            return Err(malformed("reflected ephemeral key"));
        }

        let shared = secret.diffie_hellman(&EphemeralPublic::from(remote.ephemeral_key));
        if !shared.was_contributory() {
            return Err(malformed("non-contributory key exchange"));
        }

        // Both sides order the ephemeral keys the same way, so each
        // direction gets its own key without a role flag.
        let local_is_low = local_ephemeral < remote.ephemeral_key;
        let (low, high) = if local_is_low {
            (&local_ephemeral, &remote.ephemeral_key)
        } else {
            (&remote.ephemeral_key, &local_ephemeral)
        };
        let low_to_high = derive_key(shared.as_bytes(), low, high, KEY_LABEL_LOW_TO_HIGH);
        let high_to_low = derive_key(shared.as_bytes(), low, high, KEY_LABEL_HIGH_TO_LOW);
        let (send_key, recv_key) = if local_is_low {
            (low_to_high, high_to_low)
        } else {
            (high_to_low, low_to_high)
        };

        debug!(remote = %remote_peer, ?suite, "Secure channel established");

        Ok(SecureSession {
            remote_peer,
            remote_public_key: remote.identity_key,
            reader: SecureReader {
                io: reader,
                cipher: cipher(&recv_key)?,
                counter: 0,
            },
            writer: SecureWriter {
                io: writer,
                cipher: cipher(&send_key)?,
                counter: 0,
            },
        })
    }
}

fn nonce_bytes(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// An authenticated, encrypted message session with one remote peer.
pub struct SecureSession {
    remote_peer: PeerId,
    remote_public_key: PublicKey,
    reader: SecureReader,
    writer: SecureWriter,
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("remote_peer", &self.remote_peer)
            .finish_non_exhaustive()
    }
}

impl SecureSession {
    /// The authenticated remote peer.
    pub fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }

    /// The remote's long-term identity key.
    pub fn remote_public_key(&self) -> &PublicKey {
        &self.remote_public_key
    }

    /// Encrypt and send one message.
    pub async fn send(&mut self, plaintext: &[u8]) -> NetworkResult<()> {
        self.writer.send(plaintext).await
    }

    /// Receive and decrypt one message. Fails with `SessionClosed` at EOF.
    pub async fn receive(&mut self) -> NetworkResult<Vec<u8>> {
        self.reader.receive().await
    }

    /// Close the write side of the session.
    pub async fn close(&mut self) -> NetworkResult<()> {
        self.writer.close().await
    }

    /// Split into independently owned halves.
    pub fn split(self) -> (SecureReader, SecureWriter) {
        (self.reader, self.writer)
    }
}

/// Receiving half of a [`SecureSession`].
pub struct SecureReader {
    io: ReadHalf<BoxedIo>,
    cipher: Aes256Gcm,
    counter: u64,
}

impl SecureReader {
    /// Receive and decrypt one message. Fails with `SessionClosed` at EOF.
    pub async fn receive(&mut self) -> NetworkResult<Vec<u8>> {
        let mut len = [0u8; 4];
        match self.io.read_exact(&mut len).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(NetworkError::SessionClosed)
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len) as usize;
        if len < AEAD_TAG_LEN || len > MAX_SECURE_FRAME + AEAD_TAG_LEN {
            return Err(NetworkError::Decoding(format!(
                "secure frame of {} bytes",
                len
            )));
        }

        let mut ciphertext = vec![0u8; len];
        self.io.read_exact(&mut ciphertext).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                NetworkError::SessionClosed
            } else {
                e.into()
            }
        })?;

        let nonce = nonce_bytes(self.counter);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| NetworkError::Decoding("secure frame failed authentication".into()))?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(NetworkError::SessionClosed)?;

        trace!(len = plaintext.len(), "Secure frame received");
        Ok(plaintext)
    }
}

/// Sending half of a [`SecureSession`].
pub struct SecureWriter {
    io: WriteHalf<BoxedIo>,
    cipher: Aes256Gcm,
    counter: u64,
}

impl SecureWriter {
    /// Encrypt and send one message of at most 64 KiB.
    pub async fn send(&mut self, plaintext: &[u8]) -> NetworkResult<()> {
        if plaintext.len() > MAX_SECURE_FRAME {
            return Err(NetworkError::Encoding(format!(
                "secure frame of {} bytes exceeds {}",
                plaintext.len(),
                MAX_SECURE_FRAME
            )));
        }

        let nonce = nonce_bytes(self.counter);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| NetworkError::Encoding("encryption failed".into()))?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(NetworkError::SessionClosed)?;

        let mut buf = Vec::with_capacity(4 + ciphertext.len());
        buf.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
        buf.extend_from_slice(&ciphertext);
        self.io.write_all(&buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Shut down the write side.
    pub async fn close(&mut self) -> NetworkResult<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn pipe() -> (BoxedIo, BoxedIo) {
        let (a, b) = duplex(64 * 1024);
        (Box::new(a), Box::new(b))
    }

    async fn handshake(
        dialer_upgrade: SignedX25519Upgrade,
        listener_upgrade: SignedX25519Upgrade,
        expected: Option<PeerId>,
        listener_id: Keypair,
    ) -> (NetworkResult<SecureSession>, NetworkResult<SecureSession>) {
        let dialer_id = Keypair::generate();
        let (a, b) = pipe();
        let listener =
            tokio::spawn(async move { listener_upgrade.secure(b, &listener_id, None).await });
        let dialed = dialer_upgrade.secure(a, &dialer_id, expected).await;
        (dialed, listener.await.unwrap())
    }

    #[tokio::test]
    async fn test_handshake_authenticates_both_sides() {
        let listener_id = Keypair::generate();
        let listener_peer = listener_id.peer_id();
        let (dialed, accepted) = handshake(
            SignedX25519Upgrade::new(),
            SignedX25519Upgrade::new(),
            Some(listener_peer),
            listener_id,
        )
        .await;

        let mut dialed = dialed.unwrap();
        let mut accepted = accepted.unwrap();
        assert_eq!(dialed.remote_peer(), listener_peer);
        assert_eq!(
            accepted.remote_public_key().to_peer_id(),
            accepted.remote_peer()
        );

        dialed.send(b"hello").await.unwrap();
        dialed.send(b"world").await.unwrap();
        assert_eq!(accepted.receive().await.unwrap(), b"hello");
        assert_eq!(accepted.receive().await.unwrap(), b"world");

        accepted.send(b"back").await.unwrap();
        assert_eq!(dialed.receive().await.unwrap(), b"back");
    }

    #[tokio::test]
    async fn test_wrong_expected_peer() {
        let impostor = Keypair::generate();
        let expected = Keypair::generate().peer_id();
        let (dialed, _) = handshake(
            SignedX25519Upgrade::new(),
            SignedX25519Upgrade::new(),
            Some(expected),
            impostor,
        )
        .await;

        match dialed {
            Err(NetworkError::HandshakeFailure(HandshakeError::PeerIdMismatch {
                expected: e,
                ..
            })) => assert_eq!(e, expected),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_common_suite() {
        let (dialed, accepted) = handshake(
            SignedX25519Upgrade::new(),
            SignedX25519Upgrade::new().with_suites(vec![]),
            None,
            Keypair::generate(),
        )
        .await;

        assert!(matches!(
            dialed,
            Err(NetworkError::HandshakeFailure(
                HandshakeError::UnsupportedCipherSuite
            ))
        ));
        assert!(matches!(
            accepted,
            Err(NetworkError::HandshakeFailure(
                HandshakeError::UnsupportedCipherSuite
            ))
        ));
    }

    #[tokio::test]
    async fn test_garbage_hello_is_malformed() {
        let (a, mut b) = pipe();
        let garbage = tokio::spawn(async move {
            b.write_all(&[0x00, 0x03, 0xde, 0xad, 0xbe]).await.unwrap();
            // Keep the pipe open until the handshake gives up.
            let mut sink = Vec::new();
            let _ = b.read_to_end(&mut sink).await;
        });

        let result = SignedX25519Upgrade::new()
            .secure(a, &Keypair::generate(), None)
            .await;
        assert!(matches!(
            result,
            Err(NetworkError::HandshakeFailure(HandshakeError::Malformed(_)))
        ));
        garbage.abort();
    }

    #[tokio::test]
    async fn test_eof_is_session_closed() {
        let (dialed, accepted) = handshake(
            SignedX25519Upgrade::new(),
            SignedX25519Upgrade::new(),
            None,
            Keypair::generate(),
        )
        .await;
        let mut dialed = dialed.unwrap();
        let mut accepted = accepted.unwrap();

        dialed.close().await.unwrap();
        assert!(matches!(
            accepted.receive().await,
            Err(NetworkError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (dialed, accepted) = handshake(
            SignedX25519Upgrade::new(),
            SignedX25519Upgrade::new(),
            None,
            Keypair::generate(),
        )
        .await;
        let mut dialed = dialed.unwrap();
        let mut accepted = accepted.unwrap();
        let drain = tokio::spawn(async move { accepted.receive().await.map(|m| m.len()) });

        let result = dialed.send(&vec![0u8; MAX_SECURE_FRAME + 1]).await;
        assert!(matches!(result, Err(NetworkError::Encoding(_))));
        assert!(dialed.send(&vec![0u8; MAX_SECURE_FRAME]).await.is_ok());
        assert_eq!(drain.await.unwrap().unwrap(), MAX_SECURE_FRAME);
    }

    #[test]
    fn test_directional_keys_differ() {
        let low = [1u8; 32];
        let high = [2u8; 32];
        let a = derive_key(b"shared", &low, &high, KEY_LABEL_LOW_TO_HIGH);
        let b = derive_key(b"shared", &low, &high, KEY_LABEL_HIGH_TO_LOW);
        assert_ne!(a, b);
    }
}
