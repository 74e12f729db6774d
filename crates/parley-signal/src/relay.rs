//! Signaling relay
//!
//! Every inbound envelope is re-stamped with the type of the entry point it
//! arrived on and the current time, then handled according to that type:
//!
//! - OFFER, ANSWER, ICE_CANDIDATE, CALL_REQUEST are forwarded only if the
//!   destination peer is registered; otherwise they are dropped and the
//!   sender is not told.
//! - CALL_ACCEPT, CALL_REJECT, TYPING go straight to the destination's
//!   private address.
//! - PEER_ONLINE registers the sender, introduces every peer that was
//!   already online to it, then announces it to everyone.
//! - PEER_OFFLINE unregisters the sender and announces its departure.
//!
//! The remaining types are server-to-client only and have no entry point.
//!
//! # Known limitation
//!
//! Introductions for two peers coming online at the same time are not
//! synchronized with each other. Each newcomer captures the online set before
//! registering, so if A and B race, A may capture a set without B while B's
//! broadcast reaches A anyway (harmless), or B may capture a set that lacks A
//! and see A's broadcast before it subscribed (missed introduction).

use std::sync::Arc;

use tracing::{debug, info, warn};

use parley_core::unix_millis;

use crate::messages::{EnvelopeKind, SignalingEnvelope};
use crate::presence::{PresenceBroadcaster, Transport};
use crate::registry::{SessionId, SessionRegistry};

/// What the relay did with an envelope
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to the transport for the destination peer
    Forwarded { to: String },
    /// Destination is not registered; dropped silently
    Dropped { to: String },
    /// Sender registered and introduced to `existing` peers
    Introduced { peer_id: String, existing: usize },
    /// Sender unregistered and departure announced
    Departed { peer_id: String },
    /// A field the route requires was absent or empty
    MissingField(&'static str),
    /// The type has no inbound entry point
    Unroutable(EnvelopeKind),
}

/// Routes signaling envelopes between registered peers
pub struct Relay {
    registry: Arc<SessionRegistry>,
    presence: PresenceBroadcaster,
}

impl Relay {
    pub fn new(registry: Arc<SessionRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            presence: PresenceBroadcaster::new(transport),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// A transport connection opened
    pub fn connect(&self, session: &SessionId) {
        debug!("Session {} connected", session);
    }

    /// A transport connection closed
    ///
    /// Announces PEER_OFFLINE for the peer bound to `session`, unless an
    /// explicit PEER_OFFLINE already unbound it.
    pub fn disconnect(&self, session: &SessionId) -> Option<String> {
        match self.registry.unregister_by_session(session) {
            Some(peer_id) => {
                info!("Cleaning up peer {} from session {}", peer_id, session);
                self.presence
                    .broadcast_to_all(&PresenceBroadcaster::peer_offline(&peer_id));
                Some(peer_id)
            }
            None => {
                debug!("No peer bound to session {}", session);
                None
            }
        }
    }

    /// Handle an envelope that arrived on entry point `route` from `session`
    pub fn dispatch(
        &self,
        route: EnvelopeKind,
        mut envelope: SignalingEnvelope,
        session: &SessionId,
    ) -> Dispatch {
        envelope.kind = route;
        envelope.timestamp = unix_millis();

        match route {
            EnvelopeKind::Offer
            | EnvelopeKind::Answer
            | EnvelopeKind::IceCandidate
            | EnvelopeKind::CallRequest => self.forward_if_online(envelope),

            EnvelopeKind::CallAccept | EnvelopeKind::CallReject | EnvelopeKind::Typing => {
                self.forward(envelope)
            }

            EnvelopeKind::PeerOnline => self.peer_online(envelope, session),

            EnvelopeKind::PeerOffline => self.peer_offline(envelope, session),

            EnvelopeKind::CallEnd
            | EnvelopeKind::Message
            | EnvelopeKind::GroupMemberJoined
            | EnvelopeKind::GroupMemberLeft
            | EnvelopeKind::GroupUpdated
            | EnvelopeKind::Error => {
                warn!("No entry point for {:?} from session {}", route, session);
                Dispatch::Unroutable(route)
            }
        }
    }

    fn forward_if_online(&self, envelope: SignalingEnvelope) -> Dispatch {
        let Some(to) = non_empty(&envelope.to) else {
            warn!("{:?} from {:?} has no destination", envelope.kind, envelope.from);
            return Dispatch::MissingField("to");
        };

        match self.registry.lookup_session(to) {
            Some(session) => {
                debug!(
                    "{:?} from {:?} to {} (session {})",
                    envelope.kind, envelope.from, to, session
                );
                let to = to.to_string();
                self.presence.send_to_peer(&to, &envelope);
                Dispatch::Forwarded { to }
            }
            None => {
                warn!(
                    "Target peer {} not online, dropping {:?} from {:?}",
                    to, envelope.kind, envelope.from
                );
                Dispatch::Dropped { to: to.to_string() }
            }
        }
    }

    fn forward(&self, envelope: SignalingEnvelope) -> Dispatch {
        let Some(to) = non_empty(&envelope.to) else {
            warn!("{:?} from {:?} has no destination", envelope.kind, envelope.from);
            return Dispatch::MissingField("to");
        };

        let to = to.to_string();
        self.presence.send_to_peer(&to, &envelope);
        Dispatch::Forwarded { to }
    }

    fn peer_online(&self, envelope: SignalingEnvelope, session: &SessionId) -> Dispatch {
        let Some(peer_id) = non_empty(&envelope.from) else {
            warn!("PEER_ONLINE from session {} without a peer id", session);
            return Dispatch::MissingField("from");
        };

        info!("Peer {} came online (session {})", peer_id, session);

        // Captured before registering so the newcomer is never introduced to itself.
        let existing = self.registry.list_peer_ids();
        self.registry.register(peer_id, session);

        let mut introduced = 0;
        for other in existing.iter().filter(|id| id.as_str() != peer_id) {
            self.presence
                .send_to_peer(peer_id, &PresenceBroadcaster::peer_online(other));
            introduced += 1;
        }
        debug!("Introduced {} existing peer(s) to {}", introduced, peer_id);

        self.presence
            .broadcast_to_all(&PresenceBroadcaster::peer_online(peer_id));
        info!("Broadcasted PEER_ONLINE for {}", peer_id);

        Dispatch::Introduced {
            peer_id: peer_id.to_string(),
            existing: introduced,
        }
    }

    fn peer_offline(&self, envelope: SignalingEnvelope, session: &SessionId) -> Dispatch {
        let Some(peer_id) = non_empty(&envelope.from) else {
            warn!("PEER_OFFLINE from session {} without a peer id", session);
            return Dispatch::MissingField("from");
        };

        info!("Peer {} went offline (session {})", peer_id, session);
        self.registry.unregister(peer_id);

        self.presence
            .broadcast_to_all(&PresenceBroadcaster::peer_offline(peer_id));
        info!("Broadcasted PEER_OFFLINE for {}", peer_id);

        Dispatch::Departed {
            peer_id: peer_id.to_string(),
        }
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{Address, RecordingTransport};

    fn setup() -> (Relay, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let relay = Relay::new(Arc::new(SessionRegistry::new()), transport.clone());
        (relay, transport)
    }

    fn online(relay: &Relay, peer_id: &str, session: &str) -> Dispatch {
        relay.dispatch(
            EnvelopeKind::PeerOnline,
            SignalingEnvelope::new(EnvelopeKind::PeerOnline).from_peer(peer_id),
            &SessionId::new(session),
        )
    }

    fn peer(id: &str) -> Address {
        Address::Peer(id.into())
    }

    #[test]
    fn test_peer_online_choreography() {
        let (relay, transport) = setup();
        online(&relay, "alice", "s-alice");
        let before = transport.sent().len();

        let outcome = online(&relay, "bob", "s-bob");
        assert_eq!(
            outcome,
            Dispatch::Introduced {
                peer_id: "bob".into(),
                existing: 1
            }
        );

        let sent = &transport.sent()[before..];
        let to_bob: Vec<_> = sent.iter().filter(|(a, _)| *a == peer("bob")).collect();
        assert_eq!(to_bob.len(), 1);
        assert_eq!(to_bob[0].1.kind, EnvelopeKind::PeerOnline);
        assert_eq!(to_bob[0].1.from.as_deref(), Some("alice"));

        let to_all: Vec<_> = sent.iter().filter(|(a, _)| *a == Address::AllPeers).collect();
        assert_eq!(to_all.len(), 1);
        assert_eq!(to_all[0].1.from.as_deref(), Some("bob"));

        assert!(sent.iter().all(|(a, _)| *a != peer("alice")));
        assert!(relay.registry().is_online("bob"));
    }

    #[test]
    fn test_first_peer_is_not_introduced_to_itself() {
        let (relay, transport) = setup();
        online(&relay, "alice", "s1");

        assert!(transport.sent_to(&peer("alice")).is_empty());
        assert_eq!(transport.sent_to(&Address::AllPeers).len(), 1);
    }

    #[test]
    fn test_reannounce_skips_self() {
        let (relay, transport) = setup();
        online(&relay, "alice", "s1");
        online(&relay, "alice", "s2");

        assert!(transport.sent_to(&peer("alice")).is_empty());
        assert_eq!(
            relay.registry().lookup_session("alice"),
            Some(SessionId::new("s2"))
        );
    }

    #[test]
    fn test_offer_to_registered_peer_is_forwarded() {
        let (relay, transport) = setup();
        online(&relay, "alice", "s1");
        online(&relay, "bob", "s2");

        let offer = SignalingEnvelope::new(EnvelopeKind::Answer)
            .from_peer("alice")
            .to_peer("bob")
            .with_payload(serde_json::json!({"sdp": "v=0"}));
        let outcome = relay.dispatch(EnvelopeKind::Offer, offer, &SessionId::new("s1"));
        assert_eq!(outcome, Dispatch::Forwarded { to: "bob".into() });

        let delivered = transport.sent_to(&peer("bob"));
        let last = delivered.last().unwrap();
        assert_eq!(last.kind, EnvelopeKind::Offer);
        assert_eq!(last.payload, Some(serde_json::json!({"sdp": "v=0"})));
        assert!(last.timestamp > 0);
    }

    #[test]
    fn test_unknown_destination_is_silent() {
        let (relay, transport) = setup();

        let offer = SignalingEnvelope::new(EnvelopeKind::Offer)
            .from_peer("alice")
            .to_peer("nobody");
        let outcome = relay.dispatch(EnvelopeKind::Offer, offer, &SessionId::new("s1"));

        assert_eq!(outcome, Dispatch::Dropped { to: "nobody".into() });
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_call_accept_skips_registry_check() {
        let (relay, transport) = setup();

        let accept = SignalingEnvelope::new(EnvelopeKind::CallAccept)
            .from_peer("bob")
            .to_peer("alice");
        let outcome = relay.dispatch(EnvelopeKind::CallAccept, accept, &SessionId::new("s2"));

        assert_eq!(outcome, Dispatch::Forwarded { to: "alice".into() });
        assert_eq!(transport.sent_to(&peer("alice")).len(), 1);
    }

    #[test]
    fn test_missing_destination() {
        let (relay, transport) = setup();

        let typing = SignalingEnvelope::new(EnvelopeKind::Typing).from_peer("bob");
        let outcome = relay.dispatch(EnvelopeKind::Typing, typing, &SessionId::new("s2"));

        assert_eq!(outcome, Dispatch::MissingField("to"));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_explicit_offline_then_disconnect_fires_once() {
        let (relay, transport) = setup();
        online(&relay, "alice", "s1");

        let offline = SignalingEnvelope::new(EnvelopeKind::PeerOffline).from_peer("alice");
        let outcome = relay.dispatch(EnvelopeKind::PeerOffline, offline, &SessionId::new("s1"));
        assert_eq!(
            outcome,
            Dispatch::Departed {
                peer_id: "alice".into()
            }
        );
        assert_eq!(relay.disconnect(&SessionId::new("s1")), None);

        let offline_broadcasts = transport
            .sent_to(&Address::AllPeers)
            .into_iter()
            .filter(|e| e.kind == EnvelopeKind::PeerOffline)
            .count();
        assert_eq!(offline_broadcasts, 1);
        assert!(!relay.registry().is_online("alice"));
    }

    #[test]
    fn test_disconnect_announces_departure() {
        let (relay, transport) = setup();
        online(&relay, "alice", "s1");

        assert_eq!(
            relay.disconnect(&SessionId::new("s1")).as_deref(),
            Some("alice")
        );
        assert_eq!(relay.disconnect(&SessionId::new("s1")), None);

        let last = transport.sent_to(&Address::AllPeers).pop().unwrap();
        assert_eq!(last.kind, EnvelopeKind::PeerOffline);
        assert_eq!(last.from.as_deref(), Some("alice"));
    }

    #[test]
    fn test_server_only_types_are_unroutable() {
        let (relay, transport) = setup();

        let msg = SignalingEnvelope::new(EnvelopeKind::Message)
            .from_peer("alice")
            .to_peer("bob");
        let outcome = relay.dispatch(EnvelopeKind::GroupUpdated, msg, &SessionId::new("s1"));

        assert_eq!(outcome, Dispatch::Unroutable(EnvelopeKind::GroupUpdated));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_online_without_peer_id() {
        let (relay, _transport) = setup();

        let outcome = relay.dispatch(
            EnvelopeKind::PeerOnline,
            SignalingEnvelope::new(EnvelopeKind::PeerOnline),
            &SessionId::new("s1"),
        );
        assert_eq!(outcome, Dispatch::MissingField("from"));
        assert!(relay.registry().is_empty());
    }
}
