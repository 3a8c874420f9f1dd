//! Identity Handshake
//!
//! Per-connection state machine taking a connection from unidentified to
//! verified. The relay issues a nonce challenge at connection open; the
//! only accepted transition event is an `identify-res` carrying a public
//! key and a signature over that nonce. States run `Unverified → Verified`,
//! terminal; there is no path back.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection_registry::{ConnectionId, ConnectionRegistry};
use crate::error::{HandshakeError, RegistryError};
use crate::mailbox::MailboxStore;
use crate::verifier::SignatureVerifier;

/// Result of processing one `identify-res` message.
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// Ownership of the key was proven. Any payloads parked for it are
    /// returned, in store order, for delivery as one batched pickup.
    Verified {
        pickup: Vec<String>,
        /// Previous live holder of the key, if this identification
        /// superseded one.
        evicted: Option<ConnectionId>,
    },
    /// The connection was already verified. Tolerated silently so client
    /// retransmissions are harmless, but anomalous enough to log.
    AlreadyVerified,
    /// The signature did not prove ownership. No state change: the
    /// connection stays open and unverified, and may retry with a
    /// corrected signature over the same nonce.
    Rejected,
}

/// Drives the identify challenge/response exchange.
pub struct IdentityHandshake {
    registry: Arc<ConnectionRegistry>,
    mailbox: Arc<dyn MailboxStore>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl IdentityHandshake {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        mailbox: Arc<dyn MailboxStore>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        IdentityHandshake {
            registry,
            mailbox,
            verifier,
        }
    }

    /// Processes an `identify-res {publicKey, signature}` for `id`.
    ///
    /// A verification failure is an [`HandshakeOutcome::Rejected`], not an
    /// error; errors mean the connection vanished mid-handshake or the
    /// mailbox is unavailable. In the latter case the verified transition
    /// has already happened (it is monotonic and stands); the fetch is
    /// all-or-nothing, so the parked entries survive for the recipient's
    /// next identification.
    pub fn process_identify_res(
        &self,
        id: ConnectionId,
        public_key: &str,
        signature: &str,
    ) -> Result<HandshakeOutcome, HandshakeError> {
        let conn = self
            .registry
            .find_by_handle(id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        if conn.is_verified() {
            warn!("[{}] Repeated identify-res on verified connection", id.short());
            return Ok(HandshakeOutcome::AlreadyVerified);
        }

        // The nonce is the exact value issued at connection open; it is not
        // rotated on failure.
        if !self.verifier.verify(public_key, &conn.nonce, signature) {
            debug!("[{}] Signature verification failed", id.short());
            return Ok(HandshakeOutcome::Rejected);
        }

        let evicted = self.registry.mark_verified(id, public_key)?;
        if let Some(prev) = evicted {
            debug!(
                "[{}] Identity re-identified, superseding connection [{}]",
                id.short(),
                prev.short()
            );
        }

        let pickup = self.mailbox.fetch_and_clear(public_key)?;
        Ok(HandshakeOutcome::Verified { pickup, evicted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MemoryMailboxStore;

    /// Verifier stub: accepts iff the signature equals "valid".
    struct StubVerifier;

    impl SignatureVerifier for StubVerifier {
        fn verify(&self, _public_key: &str, _message: &[u8], signature: &str) -> bool {
            signature == "valid"
        }
    }

    fn setup() -> (
        Arc<ConnectionRegistry>,
        Arc<MemoryMailboxStore>,
        IdentityHandshake,
    ) {
        let registry = Arc::new(ConnectionRegistry::new());
        let mailbox = Arc::new(MemoryMailboxStore::new());
        let handshake =
            IdentityHandshake::new(registry.clone(), mailbox.clone(), Arc::new(StubVerifier));
        (registry, mailbox, handshake)
    }

    #[test]
    fn test_valid_identify_verifies_connection() {
        let (registry, _mailbox, handshake) = setup();
        let id = ConnectionId::new();
        let _keep = registry.add(id).unwrap();

        let outcome = handshake.process_identify_res(id, "key-a", "valid").unwrap();
        match outcome {
            HandshakeOutcome::Verified { pickup, evicted } => {
                assert!(pickup.is_empty());
                assert!(evicted.is_none());
            }
            other => panic!("Expected Verified, got {:?}", other),
        }
        assert!(registry.find_by_handle(id).unwrap().is_verified());
    }

    #[test]
    fn test_verified_connection_drains_mailbox() {
        let (registry, mailbox, handshake) = setup();
        mailbox.store("key-a", "first").unwrap();
        mailbox.store("key-a", "second").unwrap();

        let id = ConnectionId::new();
        let _keep = registry.add(id).unwrap();

        let outcome = handshake.process_identify_res(id, "key-a", "valid").unwrap();
        match outcome {
            HandshakeOutcome::Verified { pickup, .. } => {
                assert_eq!(pickup, vec!["first".to_string(), "second".to_string()]);
            }
            other => panic!("Expected Verified, got {:?}", other),
        }
        // Delivered entries are gone in the same logical operation.
        assert_eq!(mailbox.entry_count(), 0);
    }

    #[test]
    fn test_bad_signature_leaves_connection_unverified() {
        let (registry, mailbox, handshake) = setup();
        mailbox.store("key-a", "parked").unwrap();

        let id = ConnectionId::new();
        let _keep = registry.add(id).unwrap();

        let outcome = handshake
            .process_identify_res(id, "key-a", "forged")
            .unwrap();
        assert!(matches!(outcome, HandshakeOutcome::Rejected));
        assert!(!registry.find_by_handle(id).unwrap().is_verified());
        // A failed attempt must not touch the mailbox.
        assert_eq!(mailbox.entry_count(), 1);
    }

    #[test]
    fn test_retry_over_same_nonce_succeeds() {
        let (registry, _mailbox, handshake) = setup();
        let id = ConnectionId::new();
        let _keep = registry.add(id).unwrap();

        let rejected = handshake
            .process_identify_res(id, "key-a", "forged")
            .unwrap();
        assert!(matches!(rejected, HandshakeOutcome::Rejected));

        // The nonce was not rotated; a corrected signature still works.
        let outcome = handshake.process_identify_res(id, "key-a", "valid").unwrap();
        assert!(matches!(outcome, HandshakeOutcome::Verified { .. }));
    }

    #[test]
    fn test_repeated_identify_is_ignored() {
        let (registry, mailbox, handshake) = setup();
        let id = ConnectionId::new();
        let _keep = registry.add(id).unwrap();

        handshake.process_identify_res(id, "key-a", "valid").unwrap();

        // Parked after verification; a retransmitted identify-res must not
        // trigger a second pickup.
        mailbox.store("key-a", "later").unwrap();
        let outcome = handshake.process_identify_res(id, "key-a", "valid").unwrap();
        assert!(matches!(outcome, HandshakeOutcome::AlreadyVerified));
        assert_eq!(mailbox.entry_count(), 1);
        assert!(registry.find_by_handle(id).unwrap().is_verified());
    }

    #[test]
    fn test_closed_connection_is_an_error() {
        let (_registry, _mailbox, handshake) = setup();
        let id = ConnectionId::new();

        let err = handshake
            .process_identify_res(id, "key-a", "valid")
            .unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::Registry(RegistryError::UnknownConnection(_))
        ));
    }

    #[test]
    fn test_second_device_same_key_evicts_first() {
        let (registry, _mailbox, handshake) = setup();
        let first = ConnectionId::new();
        let second = ConnectionId::new();
        let _rx1 = registry.add(first).unwrap();
        let _rx2 = registry.add(second).unwrap();

        handshake
            .process_identify_res(first, "key-a", "valid")
            .unwrap();
        let outcome = handshake
            .process_identify_res(second, "key-a", "valid")
            .unwrap();

        match outcome {
            HandshakeOutcome::Verified { evicted, .. } => assert_eq!(evicted, Some(first)),
            other => panic!("Expected Verified, got {:?}", other),
        }
        assert_eq!(registry.find_by_public_key("key-a").unwrap().id, second);
    }
}
