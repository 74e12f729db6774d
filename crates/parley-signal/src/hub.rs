//! WebSocket session hub
//!
//! Holds the outbound channel of every open connection and implements
//! [`Transport`] on top of them. A peer's private address resolves through
//! the session registry; the shared address reaches every open session.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::messages::SignalingEnvelope;
use crate::presence::{Address, Transport};
use crate::registry::{SessionId, SessionRegistry};

/// Outbound side of every open WebSocket connection
pub struct SessionHub {
    /// Session ID to outbound frame queue
    sessions: DashMap<SessionId, mpsc::UnboundedSender<Message>>,
    /// Peer id to session bindings, shared with the relay
    registry: Arc<SessionRegistry>,
}

impl SessionHub {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            sessions: DashMap::new(),
            registry,
        }
    }

    /// Register a new connection and return the queue its writer drains
    pub fn attach(&self, session: SessionId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.insert(session, tx);
        rx
    }

    /// Forget a closed connection; dropping its queue ends the writer
    pub fn detach(&self, session: &SessionId) {
        self.sessions.remove(session);
    }

    /// Send directly to one connection, bypassing address resolution
    pub fn send_to_session(&self, session: &SessionId, envelope: &SignalingEnvelope) {
        if let Some(json) = encode(envelope) {
            self.push(session, Message::Text(json));
        }
    }

    /// Queue a raw frame (e.g. a pong) for one connection
    pub fn send_frame(&self, session: &SessionId, msg: Message) {
        self.push(session, msg);
    }

    /// Number of open connections
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn push(&self, session: &SessionId, msg: Message) {
        if let Some(tx) = self.sessions.get(session) {
            if tx.send(msg).is_err() {
                debug!("Session {} writer already closed", session);
            }
        }
    }
}

impl Transport for SessionHub {
    fn publish(&self, address: &Address, envelope: &SignalingEnvelope) {
        let Some(json) = encode(envelope) else {
            return;
        };

        match address {
            Address::Peer(peer_id) => {
                match self.registry.lookup_session(peer_id) {
                    Some(session) => self.push(&session, Message::Text(json)),
                    None => debug!("Nobody listening on {}", address),
                }
            }
            Address::AllPeers => {
                for entry in self.sessions.iter() {
                    if entry.value().send(Message::Text(json.clone())).is_err() {
                        debug!("Session {} writer already closed", entry.key());
                    }
                }
            }
        }
    }
}

fn encode(envelope: &SignalingEnvelope) -> Option<String> {
    match envelope.to_json() {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Failed to encode {:?} envelope: {}", envelope.kind, e);
            None
        }
    }
}
