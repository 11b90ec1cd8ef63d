//! Signature creation and verification
//!
//! Handshake hellos and discovery announcements are signed using Ed25519.
//!
//! Signatures are computed over the hash of the message:
//! ```text
//! signature = Ed25519_Sign(private_key, H(message))
//! ```

use ed25519_dalek::{Signature as DalekSignature, Signer, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::{PrivateKey, PublicKey, Signature};

/// Sign a message with a private key.
///
/// The message is first hashed, then the hash is signed.
///
/// # Example
/// ```
/// use plexus_crypto::{generate_identity, sign, verify};
///
/// let (private_key, public_key) = generate_identity();
/// let message = b"Hello, world!";
/// let signature = sign(&private_key, message);
/// assert!(verify(&public_key, message, &signature));
/// ```
pub fn sign(private_key: &PrivateKey, message: &[u8]) -> Signature {
    let message_hash: [u8; 32] = Sha256::digest(message).into();

    let signing_key = private_key.to_signing_key();
    let sig: DalekSignature = signing_key.sign(&message_hash);

    Signature(sig.to_bytes())
}

/// Verify a signature against a public key and message.
///
/// Returns `false` for malformed keys as well as bad signatures.
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    let message_hash: [u8; 32] = Sha256::digest(message).into();

    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };

    let sig = DalekSignature::from_bytes(&signature.0);

    verifying_key.verify(&message_hash, &sig).is_ok()
}
