//! Parley Core - Shared configuration, error types, and the LAN discovery wire format
//!
//! This crate contains the foundational types used across all Parley components.
//! It has no dependencies on networking code.

pub mod config;
pub mod error;
pub mod frame;

pub use config::{ApiConfig, Config, DiscoveryConfig, SignalConfig};
pub use error::*;
pub use frame::DiscoveryFrame;

use std::time::{SystemTime, UNIX_EPOCH};

/// Default WebSocket signaling port
pub const DEFAULT_SIGNAL_PORT: u16 = 8080;

/// Default HTTP discovery API port
pub const DEFAULT_API_PORT: u16 = 8081;

/// Default UDP discovery port
pub const DEFAULT_DISCOVERY_PORT: u16 = 8888;

/// Prefix every discovery datagram starts with
pub const DISCOVERY_PREFIX: &str = "P2P-CHAT-DISCOVERY:";

/// Discovered peers older than this are evicted (30 seconds)
pub const PEER_TTL_MS: u64 = 30_000;

/// Self-announce interval (5 seconds)
pub const BROADCAST_INTERVAL_MS: u64 = 5_000;

/// Stale peer sweep interval (10 seconds)
pub const JANITOR_INTERVAL_MS: u64 = 10_000;

/// Default blocklist file name
pub const BLOCKLIST_FILE: &str = "blocked-ips.txt";

/// Current Unix time in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}
