//! Discovery HTTP API
//!
//! Routes, all under `/api/discovery`:
//!
//! - `GET  /peers`              discovered peers keyed by source address
//! - `POST /broadcast`          set and announce the local identity
//! - `POST /reload-blocked-ips` re-read the blocklist file
//! - `GET  /blocked-ips`        current blocklist

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use parley_core::{DiscoveryError, DiscoveryFrame};
use parley_discovery::{Beacon, Blocklist, DiscoveredPeer};

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    /// None when discovery is disabled or failed to start
    pub beacon: Option<Arc<Beacon>>,
    pub blocklist: Arc<Blocklist>,
}

/// Build the API router
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let discovery_routes = Router::new()
        .route("/peers", get(handle_peers))
        .route("/broadcast", post(handle_broadcast))
        .route("/reload-blocked-ips", post(handle_reload_blocked_ips))
        .route("/blocked-ips", get(handle_blocked_ips))
        .with_state(state);

    Router::new()
        .nest("/api/discovery", discovery_routes)
        .layer(cors)
}

/// Serve the API on `addr` until the task is dropped
pub async fn serve(state: ApiState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Discovery API listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ── /peers ───────────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub ip: String,
    pub peer_id: String,
    pub username: String,
    pub port: u16,
    /// Unix milliseconds
    pub last_seen: u64,
    pub signaling_url: String,
}

impl From<DiscoveredPeer> for PeerInfo {
    fn from(peer: DiscoveredPeer) -> Self {
        Self {
            ip: peer.ip.to_string(),
            signaling_url: format!("http://{}:{}/ws/signaling", peer.ip, peer.port),
            peer_id: peer.peer_id,
            username: peer.username,
            port: peer.port,
            last_seen: peer.last_seen_ms,
        }
    }
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<BTreeMap<String, PeerInfo>> {
    let peers = match &state.beacon {
        Some(beacon) => beacon
            .discovered_peers()
            .into_iter()
            .map(|(ip, peer)| (ip.to_string(), PeerInfo::from(peer)))
            .collect(),
        None => BTreeMap::new(),
    };

    Json(peers)
}

// ── /broadcast ───────────────────────────────────────────────────────────────

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub peer_id: Option<String>,
    pub username: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub async fn handle_broadcast(
    State(state): State<ApiState>,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let (Some(peer_id), Some(username)) = (req.peer_id, req.username) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "peerId and username are required",
        ));
    };

    // Reject identities the wire format cannot carry before touching the beacon
    DiscoveryFrame::new(&peer_id, &username, 0)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let Some(beacon) = &state.beacon else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "discovery is not running",
        ));
    };

    info!("Broadcasting peer info: {} ({})", username, peer_id);
    match beacon.announce(&peer_id, &username).await {
        Ok(()) => Ok(Json(StatusResponse {
            status: "broadcasted",
        })),
        Err(DiscoveryError::InvalidIdentity(e)) => {
            Err(api_error(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(DiscoveryError::NotRunning) => Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "discovery is not running",
        )),
        Err(e) => {
            warn!("Announce failed: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

// ── /blocked-ips, /reload-blocked-ips ────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct BlockedIpsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    pub count: usize,
    #[serde(rename = "blockedIPs")]
    pub blocked_ips: Vec<String>,
}

fn sorted_blocklist(blocklist: &Blocklist) -> Vec<String> {
    let mut ips: Vec<Ipv4Addr> = blocklist.snapshot().into_iter().collect();
    ips.sort();
    ips.into_iter().map(|ip| ip.to_string()).collect()
}

pub async fn handle_reload_blocked_ips(State(state): State<ApiState>) -> Json<BlockedIpsResponse> {
    state.blocklist.reload();
    let blocked_ips = sorted_blocklist(&state.blocklist);

    Json(BlockedIpsResponse {
        status: Some("reloaded"),
        count: blocked_ips.len(),
        blocked_ips,
    })
}

pub async fn handle_blocked_ips(State(state): State<ApiState>) -> Json<BlockedIpsResponse> {
    let blocked_ips = sorted_blocklist(&state.blocklist);

    Json(BlockedIpsResponse {
        status: None,
        count: blocked_ips.len(),
        blocked_ips,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use parley_core::DiscoveryConfig;

    fn state_without_beacon(blocklist_content: &str) -> (tempfile::TempDir, ApiState) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocked-ips.txt");
        std::fs::write(&path, blocklist_content).unwrap();

        let state = ApiState {
            beacon: None,
            blocklist: Arc::new(Blocklist::load(&path)),
        };
        (dir, state)
    }

    fn request(peer_id: Option<&str>, username: Option<&str>) -> Json<BroadcastRequest> {
        Json(BroadcastRequest {
            peer_id: peer_id.map(String::from),
            username: username.map(String::from),
        })
    }

    #[tokio::test]
    async fn test_broadcast_requires_both_fields() {
        let (_dir, state) = state_without_beacon("");

        let err = handle_broadcast(State(state.clone()), request(Some("p1"), None))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let err = handle_broadcast(State(state), request(None, Some("alice")))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_broadcast_rejects_delimiter() {
        let (_dir, state) = state_without_beacon("");

        let err = handle_broadcast(State(state), request(Some("p1"), Some("al:ice")))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(err.1.error.contains("reserved delimiter"));
    }

    #[tokio::test]
    async fn test_broadcast_without_beacon_unavailable() {
        let (_dir, state) = state_without_beacon("");

        let err = handle_broadcast(State(state), request(Some("p1"), Some("alice")))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_peers_empty_without_beacon() {
        let (_dir, state) = state_without_beacon("");
        let Json(peers) = handle_peers(State(state)).await;
        assert!(peers.is_empty());
    }

    #[tokio::test]
    async fn test_peers_hide_blocked_sources() {
        let (_dir, state) = state_without_beacon("10.0.0.5\n");
        let config = DiscoveryConfig {
            port: 0,
            local_ip: Some(Ipv4Addr::new(10, 255, 255, 1)),
            ..DiscoveryConfig::default()
        };
        let beacon = Beacon::start(&config, 8080, state.blocklist.clone())
            .await
            .unwrap();

        let src = |ip: [u8; 4]| SocketAddr::from((Ipv4Addr::from(ip), 8888));
        beacon
            .state()
            .handle_datagram(src([10, 0, 0, 5]), b"P2P-CHAT-DISCOVERY:p1:alice:9000");
        beacon
            .state()
            .handle_datagram(src([10, 0, 0, 6]), b"P2P-CHAT-DISCOVERY:p2:bob:9001");

        let state = ApiState {
            beacon: Some(beacon.clone()),
            ..state
        };
        let Json(peers) = handle_peers(State(state)).await;

        assert_eq!(peers.len(), 1);
        let bob = &peers["10.0.0.6"];
        assert_eq!(bob.peer_id, "p2");
        assert_eq!(bob.signaling_url, "http://10.0.0.6:9001/ws/signaling");

        beacon.shutdown();
    }

    #[tokio::test]
    async fn test_reload_blocked_ips() {
        let (dir, state) = state_without_beacon("10.0.0.9\n10.0.0.5\n");

        let Json(listed) = handle_blocked_ips(State(state.clone())).await;
        assert_eq!(listed.count, 2);
        assert_eq!(listed.blocked_ips, vec!["10.0.0.5", "10.0.0.9"]);
        assert!(listed.status.is_none());

        std::fs::write(dir.path().join("blocked-ips.txt"), "192.168.1.1\n").unwrap();
        let Json(reloaded) = handle_reload_blocked_ips(State(state)).await;
        assert_eq!(reloaded.status, Some("reloaded"));
        assert_eq!(reloaded.count, 1);
        assert_eq!(reloaded.blocked_ips, vec!["192.168.1.1"]);
    }

    #[test]
    fn test_blocked_ips_json_shape() {
        let response = BlockedIpsResponse {
            status: None,
            count: 1,
            blocked_ips: vec!["10.0.0.5".into()],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"count": 1, "blockedIPs": ["10.0.0.5"]})
        );
    }
}
