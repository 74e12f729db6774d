//! Parley Daemon - runs the signaling relay, the LAN discovery beacon and the
//! discovery HTTP API side by side
//!
//! The three services share nothing but the blocklist and the advertised
//! signaling port. A beacon that fails to start leaves the relay and the API
//! running; the API then reports discovery as unavailable.

pub mod api;

pub use api::{router, ApiState};
