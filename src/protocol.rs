//! Wire Protocol
//!
//! JSON messages with a `type` discriminator, one per WebSocket text frame.
//! The message set is closed: anything that does not parse into one of the
//! variants below is a protocol error and closes the connection.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Messages the relay sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Handshake challenge, sent once immediately on connect.
    Identify { nonce: String },
    /// Payloads parked while the client was offline, delivered as a single
    /// batch right after a successful identification. Omitted when empty.
    PickupRes { data: Vec<String> },
    /// A live-relayed payload.
    Receive { data: String },
}

/// Messages a client sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Response to the `identify` challenge: the claimed public key and a
    /// signature over the issued nonce, both base64.
    IdentifyRes { public_key: String, signature: String },
    /// Relay `data` to the holder of `for_public_key`. Requires a prior
    /// successful `identify-res` on this connection.
    Send { for_public_key: String, data: String },
}

/// Encodes a server message as a JSON text frame.
pub fn encode_server_message(msg: &ServerMessage) -> String {
    // The message set contains nothing that can fail to serialize.
    serde_json::to_string(msg).expect("server message serialization")
}

/// Decodes a client text frame. Malformed JSON and unrecognized `type`
/// tags both surface as [`ProtocolError`].
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// WebSocket close codes, distinct per failure cause for diagnosability.
pub mod close_code {
    /// Malformed JSON or unrecognized message shape.
    pub const PROTOCOL_ERROR: u16 = 1003;
    /// This identity re-identified on a newer connection; the older
    /// connection is shut down so the key has exactly one live owner.
    pub const SUPERSEDED: u16 = 4000;
    /// Internal processing failure while handling a message.
    pub const INTERNAL_ERROR: u16 = 4001;
    /// A message arrived for a connection the registry no longer tracks.
    pub const UNTRACKED_CONNECTION: u16 = 4002;
}
