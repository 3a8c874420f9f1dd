//! Error types for the relay core.
//!
//! All failures are connection-scoped: an error while handling one
//! connection never touches another connection's state or the registry's
//! global consistency.

use thiserror::Error;

use crate::connection_registry::ConnectionId;

/// Errors from [`crate::connection_registry::ConnectionRegistry`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `add` was called twice for the same live handle. The transport layer
    /// guarantees this never happens; hitting it means the connection's
    /// bookkeeping is corrupt and the connection must be torn down.
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    /// The handle is not (or no longer) tracked. Seen when a connection
    /// closes mid-handshake and a message for it is still in flight.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

/// Errors from [`crate::mailbox::MailboxStore`] operations.
///
/// `fetch_and_clear` is all-or-nothing: when a call fails, no entries have
/// been cleared and the parked payloads survive for a later fetch.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("mailbox store unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Errors from processing an `identify-res` message.
///
/// A bad signature is *not* an error (the connection stays open and
/// unverified, see [`crate::handshake::HandshakeOutcome::Rejected`]); these
/// variants cover registry inconsistency and mailbox failures.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A client frame that could not be decoded into a known message shape.
///
/// Covers both malformed JSON and unrecognized `type` tags; either closes
/// the connection with the protocol-error code.
#[derive(Error, Debug)]
#[error("malformed client message: {0}")]
pub struct ProtocolError(#[from] serde_json::Error);
