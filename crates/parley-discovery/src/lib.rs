//! Parley Discovery - LAN peer discovery over UDP broadcast
//!
//! Each instance periodically broadcasts `PREFIX + peerId:username:port` on
//! the shared discovery port and listens for the same from other hosts.
//! Received advertisements land in a TTL cache keyed by source address;
//! reads filter out addresses listed in the blocklist file.

pub mod beacon;
pub mod blocklist;
pub mod cache;
pub mod local_addr;

pub use beacon::{broadcast_targets, Beacon, DiscoveryState};
pub use blocklist::Blocklist;
pub use cache::{DiscoveredPeer, PeerCache};
pub use local_addr::{detect_local_ipv4, subnet_broadcast};
