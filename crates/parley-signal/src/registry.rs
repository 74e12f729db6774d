//! Session registry: which peer id is bound to which live connection
//!
//! Both directions live behind a single lock, so a lookup from either side
//! always agrees with a lookup from the other.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

/// Identifier of a live transport connection
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random session id (8 bytes, hex encoded)
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        if let Err(e) = getrandom::fill(&mut bytes) {
            warn!("RNG unavailable ({}), deriving session id from clock", e);
            bytes = parley_core::unix_millis().to_be_bytes();
        }
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
struct Bindings {
    sessions_by_peer: HashMap<String, SessionId>,
    peers_by_session: HashMap<SessionId, String>,
}

/// Bidirectional peer id <-> session mapping
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Bindings>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a peer id to a session, replacing any previous binding of either
    pub fn register(&self, peer_id: &str, session: &SessionId) {
        let mut inner = self.inner.write();

        if let Some(old_session) = inner.sessions_by_peer.remove(peer_id) {
            if &old_session != session {
                debug!("Peer {} moved from session {} to {}", peer_id, old_session, session);
            }
            inner.peers_by_session.remove(&old_session);
        }
        if let Some(old_peer) = inner.peers_by_session.remove(session) {
            if old_peer != peer_id {
                debug!("Session {} rebound from {} to {}", session, old_peer, peer_id);
            }
            inner.sessions_by_peer.remove(&old_peer);
        }

        inner
            .sessions_by_peer
            .insert(peer_id.to_string(), session.clone());
        inner
            .peers_by_session
            .insert(session.clone(), peer_id.to_string());

        info!("Registered peer {} with session {}", peer_id, session);
    }

    /// Remove a peer's binding; unknown or empty ids are ignored
    pub fn unregister(&self, peer_id: &str) {
        if peer_id.is_empty() {
            warn!("Cannot unregister peer: empty peer id");
            return;
        }

        let mut inner = self.inner.write();
        if let Some(session) = inner.sessions_by_peer.remove(peer_id) {
            inner.peers_by_session.remove(&session);
            info!("Unregistered peer {} (session {})", peer_id, session);
        }
    }

    /// Remove whatever peer is bound to `session`, returning its id
    pub fn unregister_by_session(&self, session: &SessionId) -> Option<String> {
        let mut inner = self.inner.write();
        let peer_id = inner.peers_by_session.remove(session)?;
        inner.sessions_by_peer.remove(&peer_id);

        info!("Unregistered peer {} by session {}", peer_id, session);
        Some(peer_id)
    }

    pub fn lookup_session(&self, peer_id: &str) -> Option<SessionId> {
        self.inner.read().sessions_by_peer.get(peer_id).cloned()
    }

    pub fn lookup_peer(&self, session: &SessionId) -> Option<String> {
        self.inner.read().peers_by_session.get(session).cloned()
    }

    pub fn is_online(&self, peer_id: &str) -> bool {
        self.inner.read().sessions_by_peer.contains_key(peer_id)
    }

    /// Snapshot of all registered peer ids
    pub fn list_peer_ids(&self) -> HashSet<String> {
        self.inner.read().sessions_by_peer.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions_by_peer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every binding
    pub fn clear(&self) {
        warn!("Clearing all peer registrations");
        let mut inner = self.inner.write();
        inner.sessions_by_peer.clear();
        inner.peers_by_session.clear();
    }
}
