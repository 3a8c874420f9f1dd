// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Registry
//!
//! Authoritative table of all live connections and their handshake state,
//! and the single source of truth for "who is online". Maps connection
//! handles to per-connection state plus an outbound message channel, with a
//! secondary index from *verified* public key to handle so the router can
//! find a recipient without iterating.
//!
//! The table is guarded by one `RwLock`; no lock is ever held across an
//! await point. Callers get the defined lookup operations only; raw
//! iteration is not exposed.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use ring::rand::{SecureRandom, SystemRandom};
use tokio::sync::mpsc;

use crate::error::RegistryError;

/// Length of the handshake challenge nonce in bytes.
const NONCE_LEN: usize = 32;

/// Outbound channel depth per connection. A full channel means the client
/// is not draining its socket.
const CHANNEL_CAPACITY: usize = 64;

/// Opaque handle for one live transport session, unique among concurrently
/// live connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(uuid::Uuid::new_v4())
    }

    /// Short prefix for log lines. Logs never carry public keys, so this
    /// label is the only way to correlate a session.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// State of one live connection.
///
/// `public_key` is `Some` iff the connection is verified; the transition is
/// monotonic and never reverts.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    /// Challenge nonce issued at connection open, single-use per
    /// connection. A failed verification attempt does not rotate it.
    pub nonce: Vec<u8>,
    pub public_key: Option<String>,
}

impl Connection {
    pub fn is_verified(&self) -> bool {
        self.public_key.is_some()
    }
}

/// A pre-encoded text frame queued for delivery to a connection.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub data: String,
}

struct Entry {
    conn: Connection,
    tx: mpsc::Sender<OutboundFrame>,
}

#[derive(Default)]
struct Tables {
    by_handle: HashMap<ConnectionId, Entry>,
    /// Verified public key → handle. Entries exist only for verified
    /// connections.
    by_key: HashMap<String, ConnectionId>,
}

/// Thread-safe registry of live connections.
pub struct ConnectionRegistry {
    tables: RwLock<Tables>,
    rng: SystemRandom,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            tables: RwLock::new(Tables::default()),
            rng: SystemRandom::new(),
        }
    }

    /// Registers a newly opened connection with a fresh nonce.
    ///
    /// Returns the issued nonce and the receiving end of the connection's
    /// outbound channel. Fails with `DuplicateConnection` if the handle is
    /// already tracked; the transport must never let that happen, and a
    /// caller seeing it should tear the connection down.
    pub fn add(
        &self,
        id: ConnectionId,
    ) -> Result<(Vec<u8>, mpsc::Receiver<OutboundFrame>), RegistryError> {
        let mut nonce = vec![0u8; NONCE_LEN];
        self.rng.fill(&mut nonce).expect("system RNG unavailable");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut tables = self.tables.write().unwrap();
        if tables.by_handle.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection(id));
        }
        tables.by_handle.insert(
            id,
            Entry {
                conn: Connection {
                    id,
                    nonce: nonce.clone(),
                    public_key: None,
                },
                tx,
            },
        );
        Ok((nonce, rx))
    }

    /// Removes a connection unconditionally. Idempotent: removing an absent
    /// handle is a no-op.
    ///
    /// Dropping the entry closes the outbound channel, so no further
    /// delivery to this connection can be attempted through the registry.
    pub fn remove(&self, id: ConnectionId) {
        let mut tables = self.tables.write().unwrap();
        if let Some(entry) = tables.by_handle.remove(&id) {
            if let Some(key) = entry.conn.public_key {
                // Only unlink the key if it still points at this handle; a
                // superseding connection may have re-bound it already.
                if tables.by_key.get(&key) == Some(&id) {
                    tables.by_key.remove(&key);
                }
            }
        }
    }

    pub fn find_by_handle(&self, id: ConnectionId) -> Option<Connection> {
        let tables = self.tables.read().unwrap();
        tables.by_handle.get(&id).map(|e| e.conn.clone())
    }

    /// Looks up the live connection verified for `public_key`. Reflects
    /// only verified connections; an unverified connection claiming a key
    /// is never returned.
    pub fn find_by_public_key(&self, public_key: &str) -> Option<Connection> {
        let tables = self.tables.read().unwrap();
        let id = tables.by_key.get(public_key)?;
        tables.by_handle.get(id).map(|e| e.conn.clone())
    }

    /// Flips a connection to verified and binds it to `public_key`.
    ///
    /// If another live connection already holds the key, that connection is
    /// evicted: its entry is dropped (closing its outbound channel, which
    /// its handler observes as a shutdown signal) and its handle is
    /// returned so the caller can log the supersession. The new connection
    /// always wins.
    ///
    /// Fails with `UnknownConnection` if the handle closed mid-handshake.
    /// A second call for an already verified connection is a no-op.
    pub fn mark_verified(
        &self,
        id: ConnectionId,
        public_key: &str,
    ) -> Result<Option<ConnectionId>, RegistryError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.by_handle.contains_key(&id) {
            return Err(RegistryError::UnknownConnection(id));
        }
        if tables.by_handle[&id].conn.is_verified() {
            return Ok(None);
        }

        let evicted = match tables.by_key.get(public_key) {
            Some(&prev) if prev != id => {
                tables.by_handle.remove(&prev);
                Some(prev)
            }
            _ => None,
        };

        tables.by_key.insert(public_key.to_string(), id);
        let entry = tables.by_handle.get_mut(&id).expect("checked above");
        entry.conn.public_key = Some(public_key.to_string());
        Ok(evicted)
    }

    /// Queues a frame for the verified holder of `public_key`. Returns
    /// `true` if the frame was accepted onto the connection's channel;
    /// `false` if no such connection is live or its channel is closed or
    /// full. Non-blocking, so it is safe under the read lock.
    pub fn try_send_to_key(&self, public_key: &str, frame: OutboundFrame) -> bool {
        let tables = self.tables.read().unwrap();
        let Some(id) = tables.by_key.get(public_key) else {
            return false;
        };
        match tables.by_handle.get(id) {
            Some(entry) => entry.tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// Number of currently live connections.
    pub fn connected_count(&self) -> usize {
        let tables = self.tables.read().unwrap();
        tables.by_handle.len()
    }

    /// Number of currently live *verified* connections.
    pub fn verified_count(&self) -> usize {
        let tables = self.tables.read().unwrap();
        tables.by_key.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
