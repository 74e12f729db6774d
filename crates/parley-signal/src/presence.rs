//! Outbound delivery: the transport seam and the presence broadcaster

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::messages::{EnvelopeKind, SignalingEnvelope};

/// Where an outbound envelope is published
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    /// A single peer's private address
    Peer(String),
    /// Every connected peer
    AllPeers,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Peer(id) => write!(f, "peer/{}", id),
            Address::AllPeers => f.write_str("peers"),
        }
    }
}

/// Publish primitive offered by the transport layer
///
/// Delivery is fire-and-forget: an address nobody listens on is a no-op.
pub trait Transport: Send + Sync {
    fn publish(&self, address: &Address, envelope: &SignalingEnvelope);
}

/// Sends envelopes to one peer or to everyone
#[derive(Clone)]
pub struct PresenceBroadcaster {
    transport: Arc<dyn Transport>,
}

impl PresenceBroadcaster {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn send_to_peer(&self, peer_id: &str, envelope: &SignalingEnvelope) {
        debug!("Sending {:?} to peer/{}", envelope.kind, peer_id);
        self.transport
            .publish(&Address::Peer(peer_id.to_string()), envelope);
    }

    pub fn broadcast_to_all(&self, envelope: &SignalingEnvelope) {
        debug!("Broadcasting {:?} to all peers", envelope.kind);
        self.transport.publish(&Address::AllPeers, envelope);
    }

    /// Synthetic PEER_ONLINE announcing `peer_id`
    pub fn peer_online(peer_id: &str) -> SignalingEnvelope {
        SignalingEnvelope::new(EnvelopeKind::PeerOnline).from_peer(peer_id)
    }

    /// Synthetic PEER_OFFLINE announcing `peer_id`
    pub fn peer_offline(peer_id: &str) -> SignalingEnvelope {
        SignalingEnvelope::new(EnvelopeKind::PeerOffline).from_peer(peer_id)
    }
}

/// Transport that records everything published, for tests
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: parking_lot::Mutex<Vec<(Address, SignalingEnvelope)>>,
}

#[cfg(test)]
impl RecordingTransport {
    pub(crate) fn sent(&self) -> Vec<(Address, SignalingEnvelope)> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_to(&self, address: &Address) -> Vec<SignalingEnvelope> {
        self.sent
            .lock()
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

#[cfg(test)]
impl Transport for RecordingTransport {
    fn publish(&self, address: &Address, envelope: &SignalingEnvelope) {
        self.sent.lock().push((address.clone(), envelope.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_broadcast() {
        let transport = Arc::new(RecordingTransport::default());
        let presence = PresenceBroadcaster::new(transport.clone());

        presence.send_to_peer("alice", &PresenceBroadcaster::peer_online("bob"));
        presence.broadcast_to_all(&PresenceBroadcaster::peer_offline("carol"));

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, Address::Peer("alice".into()));
        assert_eq!(sent[0].1.kind, EnvelopeKind::PeerOnline);
        assert_eq!(sent[0].1.from.as_deref(), Some("bob"));
        assert_eq!(sent[1].0, Address::AllPeers);
        assert_eq!(sent[1].1.kind, EnvelopeKind::PeerOffline);
    }

    #[test]
    fn test_address_display() {
        assert_eq!(Address::Peer("bob".into()).to_string(), "peer/bob");
        assert_eq!(Address::AllPeers.to_string(), "peers");
    }
}
