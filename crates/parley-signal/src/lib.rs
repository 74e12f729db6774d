//! Parley Signal Server
//!
//! Lightweight signaling relay for WebRTC-style handshakes.
//! Clients connect via WebSocket to exchange connection information.
//!
//! # Protocol
//!
//! 1. Client connects and sends `PEER_ONLINE` with its peer id
//! 2. Server introduces every already-online peer to the newcomer and
//!    announces the newcomer to everyone
//! 3. Peers exchange OFFER / ANSWER / ICE_CANDIDATE through the relay
//! 4. Peers establish a direct connection
//! 5. `PEER_OFFLINE` (or closing the socket) announces the departure

pub mod hub;
pub mod messages;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod server;

pub use hub::SessionHub;
pub use messages::{ClientFrame, EnvelopeKind, SignalingEnvelope};
pub use presence::{Address, PresenceBroadcaster, Transport};
pub use registry::{SessionId, SessionRegistry};
pub use relay::{Dispatch, Relay};
pub use server::SignalServer;
