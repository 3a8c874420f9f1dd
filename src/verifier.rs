//! Signature Verification
//!
//! The handshake needs exactly one cryptographic capability: checking a
//! detached signature over the issued nonce against a claimed public key.
//! It is behind a trait so the algorithm can be swapped; the production
//! implementation is Ed25519.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Verifies a detached signature against a public key and message.
///
/// Implementations must treat every malformed input (bad encoding, wrong
/// key or signature length) as a failed verification, never as a panic or
/// a distinct error: the caller only ever branches on proven/not-proven.
pub trait SignatureVerifier: Send + Sync {
    /// Returns `true` iff `signature` is a valid signature of `message`
    /// under `public_key`. Key and signature arrive base64-encoded, as on
    /// the wire.
    fn verify(&self, public_key: &str, message: &[u8], signature: &str) -> bool;
}

/// DER prefix of an Ed25519 SubjectPublicKeyInfo; some clients send the
/// SPKI form instead of the raw 32-byte key.
const SPKI_ED25519_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Ed25519 signature verification via `ring`.
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    /// Decodes a base64 public key, accepting both the raw 32-byte form
    /// and the 44-byte SPKI wrapping.
    fn decode_public_key(public_key: &str) -> Option<Vec<u8>> {
        let bytes = STANDARD.decode(public_key).ok()?;
        match bytes.len() {
            32 => Some(bytes),
            44 if bytes[..12] == SPKI_ED25519_PREFIX => Some(bytes[12..].to_vec()),
            _ => None,
        }
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &str, message: &[u8], signature: &str) -> bool {
        let Some(key_bytes) = Self::decode_public_key(public_key) else {
            return false;
        };
        let Ok(sig_bytes) = STANDARD.decode(signature) else {
            return false;
        };
        if sig_bytes.len() != 64 {
            return false;
        }

        let key = ring::signature::UnparsedPublicKey::new(&ring::signature::ED25519, &key_bytes);
        key.verify(message, &sig_bytes).is_ok()
    }
}
