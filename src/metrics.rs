//! Prometheus Metrics
//!
//! Observability counters and gauges for the relay's connection, handshake,
//! routing, and mailbox activity.

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Relay server metrics.
#[derive(Clone)]
pub struct RelayMetrics {
    /// Registry for all metrics.
    pub registry: Arc<Registry>,

    // Connection metrics
    /// Total WebSocket connections accepted.
    pub connections_total: IntCounter,
    /// Current live WebSocket connections.
    pub connections_active: IntGauge,
    /// Connection errors (upgrade failures, capacity rejections).
    pub connection_errors: IntCounter,

    // Handshake metrics
    /// Identifications that proved key ownership.
    pub handshakes_verified: IntCounter,
    /// Identifications rejected on signature verification.
    pub handshakes_rejected: IntCounter,
    /// Connections evicted because their key re-identified elsewhere.
    pub connections_superseded: IntCounter,

    // Routing metrics
    /// Payloads relayed directly to a live recipient.
    pub messages_relayed: IntCounter,
    /// Payloads lost in the close-vs-deliver race window.
    pub messages_dropped: IntCounter,
    /// Sends arriving on unverified connections, silently ignored.
    pub sends_unidentified: IntCounter,
    /// Messages rejected before dispatch (rate limited, oversize).
    pub messages_rejected: IntCounter,
    /// Protocol errors that closed a connection.
    pub protocol_errors: IntCounter,

    // Mailbox metrics
    /// Current number of parked entries.
    pub mailbox_entries: IntGauge,
    /// Total payloads parked for offline recipients.
    pub parcels_stored: IntCounter,
    /// Total payloads delivered in pickup batches.
    pub parcels_picked_up: IntCounter,
    /// Total parked entries expired and cleaned up.
    pub parcels_expired: IntCounter,

    // Rate limiting
    /// Messages rate limited.
    pub rate_limited: IntCounter,
}

impl RelayMetrics {
    /// Creates a new metrics instance with all collectors registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| {
            let c = IntCounter::with_opts(Opts::new(name, help)).unwrap();
            registry.register(Box::new(c.clone())).unwrap();
            c
        };
        let gauge = |name: &str, help: &str| {
            let g = IntGauge::with_opts(Opts::new(name, help)).unwrap();
            registry.register(Box::new(g.clone())).unwrap();
            g
        };

        let connections_total = counter(
            "relay_connections_total",
            "Total WebSocket connections accepted",
        );
        let connections_active = gauge(
            "relay_connections_active",
            "Current live WebSocket connections",
        );
        let connection_errors = counter("relay_connection_errors_total", "Total connection errors");

        let handshakes_verified = counter(
            "relay_handshakes_verified_total",
            "Identifications that proved key ownership",
        );
        let handshakes_rejected = counter(
            "relay_handshakes_rejected_total",
            "Identifications rejected on signature verification",
        );
        let connections_superseded = counter(
            "relay_connections_superseded_total",
            "Connections evicted by a re-identification of their key",
        );

        let messages_relayed = counter(
            "relay_messages_relayed_total",
            "Payloads relayed directly to live recipients",
        );
        let messages_dropped = counter(
            "relay_messages_dropped_total",
            "Payloads lost in the close-vs-deliver race window",
        );
        let sends_unidentified = counter(
            "relay_sends_unidentified_total",
            "Sends ignored because the connection never identified",
        );
        let messages_rejected = counter(
            "relay_messages_rejected_total",
            "Messages rejected before dispatch",
        );
        let protocol_errors = counter(
            "relay_protocol_errors_total",
            "Protocol errors that closed a connection",
        );

        let mailbox_entries = gauge("relay_mailbox_entries", "Current number of parked entries");
        let parcels_stored = counter(
            "relay_parcels_stored_total",
            "Payloads parked for offline recipients",
        );
        let parcels_picked_up = counter(
            "relay_parcels_picked_up_total",
            "Payloads delivered in pickup batches",
        );
        let parcels_expired = counter(
            "relay_parcels_expired_total",
            "Parked entries expired and cleaned up",
        );

        let rate_limited = counter("relay_rate_limited_total", "Messages rate limited");

        RelayMetrics {
            registry: Arc::new(registry),
            connections_total,
            connections_active,
            connection_errors,
            handshakes_verified,
            handshakes_rejected,
            connections_superseded,
            messages_relayed,
            messages_dropped,
            sends_unidentified,
            messages_rejected,
            protocol_errors,
            mailbox_entries,
            parcels_stored,
            parcels_picked_up,
            parcels_expired,
            rate_limited,
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
