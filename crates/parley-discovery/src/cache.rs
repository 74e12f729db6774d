//! Cache of peers seen on the LAN, keyed by source address

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parley_core::unix_millis;
use tracing::debug;

use crate::blocklist::Blocklist;

/// A peer advertisement received from the LAN
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Datagram source address
    pub ip: Ipv4Addr,
    pub peer_id: String,
    pub username: String,
    /// Signaling port the peer advertised
    pub port: u16,
    /// Monotonic receive time, used for expiry
    pub last_seen: Instant,
    /// Wall-clock receive time in Unix milliseconds, for reporting
    pub last_seen_ms: u64,
}

impl DiscoveredPeer {
    /// Build an entry seen right now
    pub fn seen_now(ip: Ipv4Addr, peer_id: String, username: String, port: u16) -> Self {
        Self {
            ip,
            peer_id,
            username,
            port,
            last_seen: Instant::now(),
            last_seen_ms: unix_millis(),
        }
    }

    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > ttl
    }
}

/// Concurrent peer cache with time-based expiry
pub struct PeerCache {
    peers: DashMap<Ipv4Addr, DiscoveredPeer>,
    ttl: Duration,
}

impl PeerCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            peers: DashMap::new(),
            ttl,
        }
    }

    /// Insert or refresh the entry for `peer.ip`
    pub fn upsert(&self, peer: DiscoveredPeer) {
        self.peers.insert(peer.ip, peer);
    }

    /// Remove entries older than the TTL, returning how many were removed
    pub fn evict_stale(&self, now: Instant) -> usize {
        let before = self.peers.len();
        self.peers.retain(|ip, peer| {
            let stale = peer.is_stale(now, self.ttl);
            if stale {
                debug!("Removing stale peer: {}", ip);
            }
            !stale
        });
        before.saturating_sub(self.peers.len())
    }

    /// Fresh, non-blocked entries
    ///
    /// Expiry runs first, so nothing older than the TTL is ever returned even
    /// if the janitor has not ticked yet.
    pub fn snapshot(&self, blocklist: &Blocklist) -> HashMap<Ipv4Addr, DiscoveredPeer> {
        self.evict_stale(Instant::now());

        self.peers
            .iter()
            .filter(|entry| !blocklist.contains(entry.key()))
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(ip: Ipv4Addr, age: Duration) -> DiscoveredPeer {
        let mut peer = DiscoveredPeer::seen_now(ip, "p1".into(), "alice".into(), 9000);
        peer.last_seen = Instant::now()
            .checked_sub(age)
            .expect("monotonic clock too young for test");
        peer
    }

    #[test]
    fn test_stale_entry_hidden_without_janitor() {
        let cache = PeerCache::new(Duration::from_secs(30));
        let blocklist = Blocklist::load("/nonexistent/blocked-ips.txt");

        cache.upsert(peer(Ipv4Addr::new(10, 0, 0, 8), Duration::from_secs(40)));
        cache.upsert(peer(Ipv4Addr::new(10, 0, 0, 9), Duration::from_secs(1)));

        let snapshot = cache.snapshot(&blocklist);
        assert!(!snapshot.contains_key(&Ipv4Addr::new(10, 0, 0, 8)));
        assert!(snapshot.contains_key(&Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_stale_counts_removed() {
        let cache = PeerCache::new(Duration::from_secs(30));
        cache.upsert(peer(Ipv4Addr::new(10, 0, 0, 1), Duration::from_secs(31)));
        cache.upsert(peer(Ipv4Addr::new(10, 0, 0, 2), Duration::from_secs(29)));

        assert_eq!(cache.evict_stale(Instant::now()), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_upsert_keyed_by_ip() {
        let cache = PeerCache::new(Duration::from_secs(30));
        let ip = Ipv4Addr::new(192, 168, 1, 7);

        cache.upsert(DiscoveredPeer::seen_now(ip, "p1".into(), "alice".into(), 9000));
        cache.upsert(DiscoveredPeer::seen_now(ip, "p2".into(), "bob".into(), 9001));

        let blocklist = Blocklist::load("/nonexistent/blocked-ips.txt");
        let snapshot = cache.snapshot(&blocklist);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&ip].peer_id, "p2");
        assert_eq!(snapshot[&ip].port, 9001);
    }
}
