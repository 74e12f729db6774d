//! Signaling envelopes exchanged over the WebSocket

use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_core::unix_millis;

/// Envelope type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeKind {
    // WebRTC handshake
    Offer,
    Answer,
    IceCandidate,

    // Presence
    PeerOnline,
    PeerOffline,

    // Call control
    CallRequest,
    CallAccept,
    CallReject,
    CallEnd,

    // Messaging
    Typing,
    Message,

    // Groups
    GroupMemberJoined,
    GroupMemberLeft,
    GroupUpdated,

    Error,
}

/// A typed, timestamped signaling message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    /// Sending peer id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Destination peer id (absent for broadcasts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Opaque payload (SDP, ICE candidate, chat text, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Milliseconds since the Unix epoch, assigned by the relay
    #[serde(default)]
    pub timestamp: u64,
}

impl SignalingEnvelope {
    /// Create an envelope stamped with the current time
    pub fn new(kind: EnvelopeKind) -> Self {
        Self {
            kind,
            from: None,
            to: None,
            payload: None,
            timestamp: unix_millis(),
        }
    }

    pub fn from_peer(mut self, peer_id: impl Into<String>) -> Self {
        self.from = Some(peer_id.into());
        self
    }

    pub fn to_peer(mut self, peer_id: impl Into<String>) -> Self {
        self.to = Some(peer_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Create an error envelope for the given peer
    pub fn error(to: Option<String>, message: impl Into<String>) -> Self {
        Self {
            to,
            payload: Some(Value::String(message.into())),
            ..Self::new(EnvelopeKind::Error)
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A frame sent by a client
///
/// `route` names the entry point the frame is handled by. Any `type` or
/// `timestamp` the client includes is ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientFrame {
    pub route: EnvelopeKind,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl ClientFrame {
    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Split into the entry point and the envelope it carries
    pub fn into_parts(self) -> (EnvelopeKind, SignalingEnvelope) {
        let envelope = SignalingEnvelope {
            kind: self.route,
            from: self.from,
            to: self.to,
            payload: self.payload,
            timestamp: 0,
        };
        (self.route, envelope)
    }
}
