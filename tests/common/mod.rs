// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for relay integration tests.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::signature::{Ed25519KeyPair, KeyPair};

/// A client-side identity: an Ed25519 keypair with helpers producing the
/// wire encodings the relay expects.
pub struct TestIdentity {
    key_pair: Ed25519KeyPair,
}

impl TestIdentity {
    pub fn generate() -> Self {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).expect("generate keypair");
        TestIdentity {
            key_pair: Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).expect("parse keypair"),
        }
    }

    /// The raw public key, base64 as sent in `identify-res`.
    pub fn public_key_b64(&self) -> String {
        STANDARD.encode(self.key_pair.public_key().as_ref())
    }

    /// Signs a message (normally the issued nonce), base64 as sent in
    /// `identify-res`.
    pub fn sign_b64(&self, message: &[u8]) -> String {
        STANDARD.encode(self.key_pair.sign(message).as_ref())
    }
}

/// Decodes the base64 nonce from an `identify` challenge.
#[allow(dead_code)]
pub fn decode_nonce(nonce_b64: &str) -> Vec<u8> {
    STANDARD.decode(nonce_b64).expect("nonce is valid base64")
}
