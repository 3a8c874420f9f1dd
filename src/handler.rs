// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connection Handler
//!
//! One task per connection, processing its messages strictly sequentially.
//! On open the connection is registered and challenged; the main loop then
//! multiplexes between frames from the client and frames queued by other
//! connections' tasks through the registry channel. Whatever path the task
//! exits through, the registry entry is removed.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, warn};

use crate::connection_registry::{ConnectionId, ConnectionRegistry};
use crate::error::HandshakeError;
use crate::handshake::{HandshakeOutcome, IdentityHandshake};
use crate::metrics::RelayMetrics;
use crate::protocol::{self, close_code, ClientMessage, ServerMessage};
use crate::rate_limit::RateLimiter;
use crate::router::{MessageRouter, RouteOutcome};

/// Shared dependencies for handling a WebSocket connection.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub registry: Arc<ConnectionRegistry>,
    pub handshake: Arc<IdentityHandshake>,
    pub router: Arc<MessageRouter>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: RelayMetrics,
    pub max_message_size: usize,
    pub idle_timeout: Duration,
}

/// Builds a close frame with one of the [`close_code`] values.
fn close_frame(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: Cow::from(reason),
    }))
}

/// Handles a WebSocket connection from open to close.
#[allow(clippy::too_many_lines)]
pub async fn handle_connection(ws_stream: WebSocketStream<TcpStream>, deps: ConnectionDeps) {
    let conn_id = ConnectionId::new();
    // Short session label for logging. The relay never logs public keys,
    // so operators cannot identify users from logs.
    let session = conn_id.short();

    let (mut write, mut read) = ws_stream.split();

    let (nonce, mut outbound_rx) = match deps.registry.add(conn_id) {
        Ok(pair) => pair,
        Err(e) => {
            error!("[{}] Failed to register connection: {}", session, e);
            let _ = write
                .send(close_frame(close_code::INTERNAL_ERROR, "registration failed"))
                .await;
            return;
        }
    };

    // Challenge immediately on open; the nonce is bound to this connection
    // for its whole lifetime.
    let challenge = protocol::encode_server_message(&ServerMessage::Identify {
        nonce: STANDARD.encode(&nonce),
    });
    if write.send(Message::Text(challenge)).await.is_err() {
        debug!("[{}] Closed before challenge could be sent", session);
        deps.registry.remove(conn_id);
        return;
    }
    debug!("[{}] Connected, challenge issued", session);

    // None = peer closed or transport error; Some = server-initiated close.
    let close: Option<(u16, &'static str)> = loop {
        let msg = tokio::select! {
            // WebSocket frame from the client, idle-timeout guarded
            ws_msg = timeout(deps.idle_timeout, read.next()) => {
                match ws_msg {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        debug!("[{}] Disconnected", session);
                        break None;
                    }
                    Err(_) => {
                        warn!("[{}] Idle timeout (slowloris protection)", session);
                        break None;
                    }
                }
            }
            // Frame queued by another connection's task via the registry
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if write.send(Message::Text(frame.data)).await.is_err() {
                            debug!("[{}] Write failed, disconnecting", session);
                            break None;
                        }
                        continue;
                    }
                    // Channel closed without a remove from this task: the
                    // registry dropped us in favor of a newer connection
                    // that verified the same key.
                    None => {
                        debug!("[{}] Superseded by a newer connection", session);
                        deps.metrics.connections_superseded.inc();
                        break Some((close_code::SUPERSEDED, "session superseded"));
                    }
                }
            }
        };

        let text = match msg {
            Ok(Message::Text(text)) => text,
            // Clients may send the JSON protocol in binary frames too.
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!("[{}] Binary frame is not UTF-8", session);
                    deps.metrics.protocol_errors.inc();
                    break Some((close_code::PROTOCOL_ERROR, "invalid frame"));
                }
            },
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                debug!("[{}] Client sent close", session);
                break None;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("[{}] Connection error: {}", session, e);
                break None;
            }
        };

        if text.len() > deps.max_message_size {
            warn!("[{}] Message too large: {} bytes", session, text.len());
            deps.metrics.messages_rejected.inc();
            continue;
        }

        if !deps.rate_limiter.consume(conn_id) {
            warn!("[{}] Rate limited", session);
            deps.metrics.rate_limited.inc();
            continue;
        }

        let message = match protocol::decode_client_message(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!("[{}] {}", session, e);
                deps.metrics.protocol_errors.inc();
                break Some((close_code::PROTOCOL_ERROR, "malformed message"));
            }
        };

        match message {
            ClientMessage::IdentifyRes {
                public_key,
                signature,
            } => match deps
                .handshake
                .process_identify_res(conn_id, &public_key, &signature)
            {
                Ok(HandshakeOutcome::Verified { pickup, .. }) => {
                    deps.metrics.handshakes_verified.inc();
                    debug!("[{}] Identity verified", session);

                    // Parked payloads go out as one batch; an empty mailbox
                    // sends nothing.
                    if !pickup.is_empty() {
                        let count = pickup.len();
                        let batch = protocol::encode_server_message(&ServerMessage::PickupRes {
                            data: pickup,
                        });
                        if write.send(Message::Text(batch)).await.is_err() {
                            warn!("[{}] Failed to deliver pickup batch", session);
                            break None;
                        }
                        deps.metrics.parcels_picked_up.inc_by(count as u64);
                        debug!("[{}] Delivered {} parked payloads", session, count);
                    }
                }
                Ok(HandshakeOutcome::AlreadyVerified) => {
                    // Tolerated retransmission; already logged as anomalous.
                }
                Ok(HandshakeOutcome::Rejected) => {
                    // Deliberately silent on the wire: the client learns
                    // nothing about why its identification went nowhere.
                    deps.metrics.handshakes_rejected.inc();
                }
                Err(HandshakeError::Registry(e)) => {
                    error!("[{}] {}", session, e);
                    break Some((close_code::UNTRACKED_CONNECTION, "untracked connection"));
                }
                Err(HandshakeError::Store(e)) => {
                    // The verified transition stands; the fetch cleared
                    // nothing, so the parked payloads survive for the next
                    // identification.
                    error!("[{}] Pickup failed: {}", session, e);
                }
            },
            ClientMessage::Send {
                for_public_key,
                data,
            } => {
                let Some(conn) = deps.registry.find_by_handle(conn_id) else {
                    error!("[{}] Send from untracked connection", session);
                    break Some((close_code::UNTRACKED_CONNECTION, "untracked connection"));
                };
                if !conn.is_verified() {
                    // Silently ignored, indistinguishable from loss: an
                    // unidentified sender gets no error frame.
                    debug!("[{}] Ignoring send from unidentified connection", session);
                    deps.metrics.sends_unidentified.inc();
                    continue;
                }

                match deps.router.route(&for_public_key, &data) {
                    Ok(RouteOutcome::DeliveredDirect) => deps.metrics.messages_relayed.inc(),
                    Ok(RouteOutcome::Queued) => deps.metrics.parcels_stored.inc(),
                    Ok(RouteOutcome::Dropped) => deps.metrics.messages_dropped.inc(),
                    Err(e) => {
                        // Nothing was persisted and nothing was delivered;
                        // the sender is not told either way.
                        error!("[{}] Mailbox store failed: {}", session, e);
                    }
                }
            }
        }
    };

    if let Some((code, reason)) = close {
        let _ = write.send(close_frame(code, reason)).await;
    }

    // Unconditional cleanup: no exit path may leak a registry entry.
    deps.registry.remove(conn_id);
}
