//! Message Router
//!
//! Decides, per outbound send request, between direct delivery to a live
//! verified connection and parking the payload in the mailbox. The caller
//! has already confirmed the *sender* is verified; the router never uses
//! sender identity. Payloads are not bound to their sender in any way the
//! recipient can see.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection_registry::{ConnectionRegistry, OutboundFrame};
use crate::error::StoreError;
use crate::mailbox::MailboxStore;
use crate::protocol::{encode_server_message, ServerMessage};

/// How a send request was disposed of. Fed to logs and metrics, never
/// surfaced to the sender: the protocol is fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued onto a live verified connection's outbound channel.
    DeliveredDirect,
    /// No live verified connection; parked in the mailbox.
    Queued,
    /// A live connection was found but went away (or stopped draining)
    /// before the frame could be queued. The payload is lost: this is the
    /// accepted bounded-loss window, deliberately not escalated to a
    /// mailbox fallback.
    Dropped,
}

/// Routes send requests from verified senders.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    mailbox: Arc<dyn MailboxStore>,
}

impl MessageRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, mailbox: Arc<dyn MailboxStore>) -> Self {
        MessageRouter { registry, mailbox }
    }

    /// Delivers `data` to the holder of `for_public_key`: directly if a
    /// verified connection is live, otherwise into the mailbox. Exactly one
    /// entry is stored per call; nothing is combined or deduplicated.
    pub fn route(&self, for_public_key: &str, data: &str) -> Result<RouteOutcome, StoreError> {
        // Point-in-time decision: the recipient may close between this
        // lookup and the queueing below.
        if self.registry.find_by_public_key(for_public_key).is_some() {
            let frame = OutboundFrame {
                data: encode_server_message(&ServerMessage::Receive {
                    data: data.to_string(),
                }),
            };
            if self.registry.try_send_to_key(for_public_key, frame) {
                debug!("Recipient online, delivered directly");
                Ok(RouteOutcome::DeliveredDirect)
            } else {
                warn!("Recipient vanished mid-delivery, payload dropped");
                Ok(RouteOutcome::Dropped)
            }
        } else {
            debug!("Recipient offline, parking payload in mailbox");
            self.mailbox.store(for_public_key, data)?;
            Ok(RouteOutcome::Queued)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_registry::ConnectionId;
    use crate::mailbox::MemoryMailboxStore;

    fn setup() -> (Arc<ConnectionRegistry>, Arc<MemoryMailboxStore>, MessageRouter) {
        let registry = Arc::new(ConnectionRegistry::new());
        let mailbox = Arc::new(MemoryMailboxStore::new());
        let router = MessageRouter::new(registry.clone(), mailbox.clone());
        (registry, mailbox, router)
    }

    #[test]
    fn test_offline_recipient_queues_exactly_one_entry() {
        let (_registry, mailbox, router) = setup();

        let outcome = router.route("key-a", "hello").unwrap();
        assert_eq!(outcome, RouteOutcome::Queued);
        assert_eq!(mailbox.entry_count(), 1);
        assert_eq!(
            mailbox.fetch_and_clear("key-a").unwrap(),
            vec!["hello".to_string()]
        );
    }

    #[test]
    fn test_unverified_connection_does_not_count_as_online() {
        let (registry, mailbox, router) = setup();
        let id = ConnectionId::new();
        let _keep = registry.add(id).unwrap();

        // A connection exists but has not identified as key-a, so the
        // payload must be parked.
        let outcome = router.route("key-a", "hello").unwrap();
        assert_eq!(outcome, RouteOutcome::Queued);
        assert_eq!(mailbox.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_online_recipient_gets_receive_frame_and_no_store() {
        let (registry, mailbox, router) = setup();
        let id = ConnectionId::new();
        let (_, mut rx) = registry.add(id).unwrap();
        registry.mark_verified(id, "key-a").unwrap();

        let outcome = router.route("key-a", "hello").unwrap();
        assert_eq!(outcome, RouteOutcome::DeliveredDirect);
        assert_eq!(mailbox.entry_count(), 0);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.data, r#"{"type":"receive","data":"hello"}"#);
    }

    #[test]
    fn test_multiple_sends_accumulate_in_order() {
        let (_registry, mailbox, router) = setup();

        router.route("key-a", "one").unwrap();
        router.route("key-a", "two").unwrap();
        router.route("key-a", "three").unwrap();

        assert_eq!(
            mailbox.fetch_and_clear("key-a").unwrap(),
            vec!["one".to_string(), "two".to_string(), "three".to_string()]
        );
    }

    #[tokio::test]
    async fn test_recipient_vanishing_mid_delivery_drops_payload() {
        let (registry, mailbox, router) = setup();
        let id = ConnectionId::new();
        let (_, rx) = registry.add(id).unwrap();
        registry.mark_verified(id, "key-a").unwrap();

        // The handler side of the channel goes away while the registry
        // entry is still present. This is the narrow race window.
        drop(rx);

        let outcome = router.route("key-a", "lost").unwrap();
        assert_eq!(outcome, RouteOutcome::Dropped);
        // Deliberately no mailbox fallback.
        assert_eq!(mailbox.entry_count(), 0);
    }

    #[test]
    fn test_send_after_close_falls_through_to_mailbox() {
        let (registry, mailbox, router) = setup();
        let id = ConnectionId::new();
        let _keep = registry.add(id).unwrap();
        registry.mark_verified(id, "key-a").unwrap();
        registry.remove(id);

        let outcome = router.route("key-a", "parked").unwrap();
        assert_eq!(outcome, RouteOutcome::Queued);
        assert_eq!(mailbox.entry_count(), 1);
    }
}
