//! WebSocket signal server implementation

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::hub::SessionHub;
use crate::messages::{ClientFrame, SignalingEnvelope};
use crate::registry::{SessionId, SessionRegistry};
use crate::relay::{Dispatch, Relay};

/// Signal server state
pub struct SignalServer {
    /// Open connections
    hub: Arc<SessionHub>,
    /// Envelope routing over the shared registry
    relay: Arc<Relay>,
}

impl SignalServer {
    pub fn new() -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let hub = Arc::new(SessionHub::new(registry.clone()));
        let relay = Arc::new(Relay::new(registry, hub.clone()));
        Self { hub, relay }
    }

    /// Start the signal server
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signal server listening on {}", addr);
        self.serve_listener(listener).await
    }

    /// Accept connections from an already bound listener
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let hub = self.hub.clone();
            let relay = self.relay.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, hub, relay).await {
                    debug!("Connection error from {}: {:?}", peer_addr, e);
                }
            });
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.relay.registry()
    }

    /// Get open connection count (for monitoring)
    pub fn session_count(&self) -> usize {
        self.hub.session_count()
    }

    /// Get registered peer count (for monitoring)
    pub fn peer_count(&self) -> usize {
        self.relay.registry().len()
    }
}

impl Default for SignalServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle a single connection (HTTP or WebSocket)
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Arc<SessionHub>,
    relay: Arc<Relay>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Peek at the first bytes to detect a plain HTTP health check.
    // WebSocket upgrades also start with "GET ", so only the path decides.
    let mut peek_buf = [0u8; 12];
    let n = stream.peek(&mut peek_buf).await?;

    if peek_buf[..n].starts_with(b"GET /health") {
        return handle_http_request(&mut stream, hub.session_count(), relay.registry().len())
            .await;
    }

    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let session = SessionId::generate();
    debug!("New connection from {} as session {}", peer_addr, session);

    let mut outbound = hub.attach(session.clone());
    relay.connect(&session);

    // Frames for this session may be published by any other connection task.
    tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(data)) => {
                hub.send_frame(&session, Message::Pong(data));
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error: {:?}", e);
                break;
            }
        };

        let frame = match ClientFrame::from_json(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Invalid frame from session {}: {}", session, e);
                let error = SignalingEnvelope::error(None, format!("Invalid JSON: {}", e));
                hub.send_to_session(&session, &error);
                continue;
            }
        };

        handle_frame(frame, &session, &hub, &relay);
    }

    // Cleanup on disconnect; dropping the queue ends the writer task
    hub.detach(&session);
    relay.disconnect(&session);

    debug!("Connection closed: {}", session);
    Ok(())
}

/// Route one client frame through the relay
fn handle_frame(frame: ClientFrame, session: &SessionId, hub: &SessionHub, relay: &Relay) {
    let (route, envelope) = frame.into_parts();

    let reply_to = envelope.from.clone();
    match relay.dispatch(route, envelope, session) {
        Dispatch::Unroutable(kind) => {
            let error = SignalingEnvelope::error(reply_to, format!("Unsupported route {:?}", kind));
            hub.send_to_session(session, &error);
        }
        Dispatch::MissingField(field) => {
            let error = SignalingEnvelope::error(
                reply_to,
                format!("{:?} requires a `{}` field", route, field),
            );
            hub.send_to_session(session, &error);
        }
        outcome => debug!("Session {} {:?}: {:?}", session, route, outcome),
    }
}

/// Handle an HTTP request (for health checks)
async fn handle_http_request(
    stream: &mut TcpStream,
    session_count: usize,
    peer_count: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Drain the request; the path was already matched on peek
    let mut buf = vec![0u8; 1024];
    let _ = stream.read(&mut buf).await?;

    let body = format!(
        r#"{{"status":"healthy","sessions":{},"peers":{}}}"#,
        session_count, peer_count
    );

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::EnvelopeKind;

    #[test]
    fn test_server_creation() {
        let server = SignalServer::new();
        assert_eq!(server.session_count(), 0);
        assert_eq!(server.peer_count(), 0);
    }

    #[test]
    fn test_unroutable_frame_gets_error_reply() {
        let server = SignalServer::new();
        let session = SessionId::new("s1");
        let mut rx = server.hub.attach(session.clone());

        let frame = ClientFrame::from_json(r#"{"route":"MESSAGE","from":"alice","to":"bob"}"#)
            .unwrap();
        handle_frame(frame, &session, &server.hub, &server.relay);

        match rx.try_recv().unwrap() {
            Message::Text(json) => {
                let reply = SignalingEnvelope::from_json(&json).unwrap();
                assert_eq!(reply.kind, EnvelopeKind::Error);
                assert_eq!(reply.to.as_deref(), Some("alice"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_peer_online_binds_private_address() {
        let server = SignalServer::new();
        let alice = SessionId::new("s-alice");
        let bob = SessionId::new("s-bob");
        let mut rx_alice = server.hub.attach(alice.clone());
        let mut rx_bob = server.hub.attach(bob.clone());

        let online = |id: &str| {
            ClientFrame::from_json(&format!(r#"{{"route":"PEER_ONLINE","from":"{}"}}"#, id))
                .unwrap()
        };
        handle_frame(online("alice"), &alice, &server.hub, &server.relay);
        // The shared address reaches every session
        assert!(rx_alice.try_recv().is_ok());
        assert!(rx_bob.try_recv().is_ok());

        handle_frame(online("bob"), &bob, &server.hub, &server.relay);

        // bob gets the introduction of alice, then the broadcast about bob
        let mut kinds = Vec::new();
        while let Ok(Message::Text(json)) = rx_bob.try_recv() {
            kinds.push(SignalingEnvelope::from_json(&json).unwrap().from.unwrap());
        }
        assert_eq!(kinds, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(server.peer_count(), 2);
    }

    #[test]
    fn test_reannounced_peer_reachable_after_other_session_closes() {
        let server = SignalServer::new();
        let s1 = SessionId::new("s1");
        let s2 = SessionId::new("s2");
        let sender = SessionId::new("s-bob");
        let mut rx1 = server.hub.attach(s1.clone());
        let _rx2 = server.hub.attach(s2.clone());
        let _rx_bob = server.hub.attach(sender.clone());

        let online = ClientFrame::from_json(r#"{"route":"PEER_ONLINE","from":"alice"}"#).unwrap();
        handle_frame(online.clone(), &s2, &server.hub, &server.relay);
        handle_frame(online, &s1, &server.hub, &server.relay);
        while rx1.try_recv().is_ok() {}

        // s2 lost the binding, so its close announces nothing
        server.hub.detach(&s2);
        assert_eq!(server.relay.disconnect(&s2), None);
        assert_eq!(server.registry().lookup_session("alice"), Some(s1.clone()));

        let offer = ClientFrame::from_json(
            r#"{"route":"OFFER","from":"bob","to":"alice","payload":{"sdp":"v=0"}}"#,
        )
        .unwrap();
        handle_frame(offer, &sender, &server.hub, &server.relay);

        match rx1.try_recv().unwrap() {
            Message::Text(json) => {
                let offer = SignalingEnvelope::from_json(&json).unwrap();
                assert_eq!(offer.kind, EnvelopeKind::Offer);
                assert_eq!(offer.from.as_deref(), Some("bob"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }
}
