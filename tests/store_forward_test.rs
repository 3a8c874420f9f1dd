// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Scenario tests for the identity handshake and store-and-forward routing,
//! composed below the transport: registry, handshake, and router wired
//! together with real Ed25519 verification, no sockets involved.

mod common;

use std::sync::Arc;

use common::TestIdentity;
use parcel_relay::connection_registry::{ConnectionId, ConnectionRegistry};
use parcel_relay::handshake::{HandshakeOutcome, IdentityHandshake};
use parcel_relay::mailbox::{MailboxStore, MemoryMailboxStore};
use parcel_relay::router::{MessageRouter, RouteOutcome};
use parcel_relay::verifier::Ed25519Verifier;

struct Relay {
    registry: Arc<ConnectionRegistry>,
    mailbox: Arc<MemoryMailboxStore>,
    handshake: IdentityHandshake,
    router: MessageRouter,
}

fn relay() -> Relay {
    let registry = Arc::new(ConnectionRegistry::new());
    let mailbox = Arc::new(MemoryMailboxStore::new());
    Relay {
        handshake: IdentityHandshake::new(
            registry.clone(),
            mailbox.clone(),
            Arc::new(Ed25519Verifier),
        ),
        router: MessageRouter::new(registry.clone(), mailbox.clone()),
        registry,
        mailbox,
    }
}

/// Opens a connection and completes identification for `identity`.
fn open_and_identify(relay: &Relay, identity: &TestIdentity) -> ConnectionId {
    let id = ConnectionId::new();
    let (nonce, _rx) = relay.registry.add(id).unwrap();
    let outcome = relay
        .handshake
        .process_identify_res(id, &identity.public_key_b64(), &identity.sign_b64(&nonce))
        .unwrap();
    assert!(matches!(outcome, HandshakeOutcome::Verified { .. }));
    id
}

#[test]
fn test_verified_transitions_at_most_once() {
    let relay = relay();
    let alice = TestIdentity::generate();

    let id = ConnectionId::new();
    let (nonce, _rx) = relay.registry.add(id).unwrap();

    assert!(!relay.registry.find_by_handle(id).unwrap().is_verified());

    let sig = alice.sign_b64(&nonce);
    relay
        .handshake
        .process_identify_res(id, &alice.public_key_b64(), &sig)
        .unwrap();
    assert!(relay.registry.find_by_handle(id).unwrap().is_verified());

    // A second, equally valid identify-res does not transition again.
    let outcome = relay
        .handshake
        .process_identify_res(id, &alice.public_key_b64(), &sig)
        .unwrap();
    assert!(matches!(outcome, HandshakeOutcome::AlreadyVerified));
    assert!(relay.registry.find_by_handle(id).unwrap().is_verified());
}

#[test]
fn test_offline_send_retrievable_verbatim_by_identification() {
    let relay = relay();
    let alice = TestIdentity::generate();
    let bob = TestIdentity::generate();
    let _bob_id = open_and_identify(&relay, &bob);

    let payload = "ciphertext\u{1F512} bytes %% untouched";
    let outcome = relay.router.route(&alice.public_key_b64(), payload).unwrap();
    assert_eq!(outcome, RouteOutcome::Queued);
    assert_eq!(relay.mailbox.entry_count(), 1);

    let id = ConnectionId::new();
    let (nonce, _rx) = relay.registry.add(id).unwrap();
    let outcome = relay
        .handshake
        .process_identify_res(id, &alice.public_key_b64(), &alice.sign_b64(&nonce))
        .unwrap();

    match outcome {
        HandshakeOutcome::Verified { pickup, .. } => {
            assert_eq!(pickup, vec![payload.to_string()]);
        }
        other => panic!("Expected Verified, got {:?}", other),
    }
    assert_eq!(relay.mailbox.entry_count(), 0);
}

#[tokio::test]
async fn test_online_send_delivers_without_persisting() {
    let relay = relay();
    let alice = TestIdentity::generate();

    let id = ConnectionId::new();
    let (nonce, mut rx) = relay.registry.add(id).unwrap();
    relay
        .handshake
        .process_identify_res(id, &alice.public_key_b64(), &alice.sign_b64(&nonce))
        .unwrap();

    let outcome = relay.router.route(&alice.public_key_b64(), "hi").unwrap();
    assert_eq!(outcome, RouteOutcome::DeliveredDirect);
    assert_eq!(relay.mailbox.entry_count(), 0);

    let frame = rx.recv().await.unwrap();
    assert!(frame.data.contains(r#""type":"receive""#));
}

#[test]
fn test_fetch_and_clear_is_idempotent_safe() {
    let relay = relay();
    let alice = TestIdentity::generate();
    relay.mailbox.store(&alice.public_key_b64(), "once").unwrap();

    let first = relay.mailbox.fetch_and_clear(&alice.public_key_b64()).unwrap();
    assert_eq!(first, vec!["once".to_string()]);
    // Never the same entry twice.
    let second = relay.mailbox.fetch_and_clear(&alice.public_key_b64()).unwrap();
    assert!(second.is_empty());
}

#[test]
fn test_close_then_send_persists_instead_of_delivering() {
    let relay = relay();
    let alice = TestIdentity::generate();

    let id = open_and_identify(&relay, &alice);
    relay.registry.remove(id);

    // The key no longer resolves, so the payload is parked.
    assert!(relay
        .registry
        .find_by_public_key(&alice.public_key_b64())
        .is_none());
    let outcome = relay.router.route(&alice.public_key_b64(), "parked").unwrap();
    assert_eq!(outcome, RouteOutcome::Queued);
    assert_eq!(relay.mailbox.entry_count(), 1);
}

#[test]
fn test_forged_identification_cannot_claim_anothers_mailbox() {
    let relay = relay();
    let alice = TestIdentity::generate();
    let mallory = TestIdentity::generate();
    relay.mailbox.store(&alice.public_key_b64(), "for alice").unwrap();

    // Mallory claims Alice's key but can only sign with her own.
    let id = ConnectionId::new();
    let (nonce, _rx) = relay.registry.add(id).unwrap();
    let outcome = relay
        .handshake
        .process_identify_res(id, &alice.public_key_b64(), &mallory.sign_b64(&nonce))
        .unwrap();

    assert!(matches!(outcome, HandshakeOutcome::Rejected));
    assert_eq!(relay.mailbox.entry_count(), 1);
    assert!(relay
        .registry
        .find_by_public_key(&alice.public_key_b64())
        .is_none());
}
