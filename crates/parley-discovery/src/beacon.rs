//! UDP broadcast beacon
//!
//! Three tasks share one socket bound to the discovery port:
//!
//! - a receive loop that records every well-formed advertisement in the
//!   peer cache (blocked senders included; filtering happens on read),
//! - a self-announce task that re-broadcasts the local identity every
//!   broadcast interval once one has been set,
//! - a janitor that evicts stale cache entries every janitor interval.
//!
//! Each advertisement goes to the limited broadcast address and to the /24
//! directed broadcast address, since some routers drop 255.255.255.255.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use parley_core::{DiscoveryConfig, DiscoveryError, DiscoveryFrame};

use crate::blocklist::Blocklist;
use crate::cache::{DiscoveredPeer, PeerCache};
use crate::local_addr::{detect_local_ipv4, subnet_broadcast};

/// Receive buffer size; advertisements are far smaller
const RECV_BUFFER_SIZE: usize = 1024;

/// Shared state behind the beacon's tasks
pub struct DiscoveryState {
    local_ip: Ipv4Addr,
    prefix: String,
    cache: PeerCache,
    blocklist: Arc<Blocklist>,
    identity: RwLock<Option<DiscoveryFrame>>,
}

impl DiscoveryState {
    pub fn new(
        local_ip: Ipv4Addr,
        prefix: impl Into<String>,
        ttl: Duration,
        blocklist: Arc<Blocklist>,
    ) -> Self {
        Self {
            local_ip,
            prefix: prefix.into(),
            cache: PeerCache::new(ttl),
            blocklist,
            identity: RwLock::new(None),
        }
    }

    /// Process one datagram. Returns true if the cache was updated.
    pub fn handle_datagram(&self, src: SocketAddr, data: &[u8]) -> bool {
        let ip = match src.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => {
                trace!("Ignoring IPv6 datagram from {}", src);
                return false;
            }
        };

        // Our own broadcasts loop back to us
        if ip == self.local_ip {
            return false;
        }

        let text = String::from_utf8_lossy(data);
        if !text.starts_with(&self.prefix) {
            trace!("Ignoring non-discovery datagram from {}", src);
            return false;
        }

        match DiscoveryFrame::decode(&self.prefix, &text) {
            Ok(frame) => {
                debug!(
                    "Discovered peer: {} ({}) at {}:{}",
                    frame.username, frame.peer_id, ip, frame.port
                );
                self.cache.upsert(DiscoveredPeer::seen_now(
                    ip,
                    frame.peer_id,
                    frame.username,
                    frame.port,
                ));
                true
            }
            Err(e) => {
                warn!("Failed to parse discovery message from {}: {:?} ({})", ip, text, e);
                false
            }
        }
    }

    /// Fresh peers, minus blocked addresses
    pub fn discovered_peers(&self) -> HashMap<Ipv4Addr, DiscoveredPeer> {
        self.cache.snapshot(&self.blocklist)
    }

    pub fn identity(&self) -> Option<DiscoveryFrame> {
        self.identity.read().clone()
    }

    pub fn set_identity(&self, frame: DiscoveryFrame) {
        *self.identity.write() = Some(frame);
    }

    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    pub fn cache(&self) -> &PeerCache {
        &self.cache
    }

    pub fn blocklist(&self) -> &Arc<Blocklist> {
        &self.blocklist
    }
}

/// A running discovery beacon
pub struct Beacon {
    state: Arc<DiscoveryState>,
    /// Taken on shutdown; the tasks hold the only other references
    socket: Mutex<Option<Arc<UdpSocket>>>,
    /// Where advertisements are sent
    targets: Vec<SocketAddr>,
    /// Signaling port we advertise
    advertised_port: u16,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Beacon {
    /// Bind the discovery socket and spawn the receive, announce and janitor tasks
    ///
    /// Fails with [`DiscoveryError::NoLocalAddress`] when no usable local
    /// IPv4 address exists; the beacon is not started in that case.
    pub async fn start(
        config: &DiscoveryConfig,
        advertised_port: u16,
        blocklist: Arc<Blocklist>,
    ) -> Result<Arc<Self>, DiscoveryError> {
        let local_ip = config
            .local_ip
            .or_else(detect_local_ipv4)
            .ok_or(DiscoveryError::NoLocalAddress)?;

        info!("Starting UDP discovery on {}:{}", local_ip, config.port);

        let socket = UdpSocket::from_std(bind_broadcast_socket(config.port)?)?;
        let socket = Arc::new(socket);
        let state = Arc::new(DiscoveryState::new(
            local_ip,
            config.prefix.clone(),
            config.peer_ttl(),
            blocklist,
        ));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let beacon = Arc::new(Self {
            state,
            socket: Mutex::new(Some(socket.clone())),
            targets: broadcast_targets(local_ip, config.port),
            advertised_port,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });

        let receiver = tokio::spawn(receive_loop(
            socket.clone(),
            beacon.state.clone(),
            shutdown_rx,
        ));
        let announcer = tokio::spawn(announce_loop(
            Announcer::new(socket, beacon.state.clone(), beacon.targets.clone()),
            config.broadcast_interval(),
        ));
        let janitor = tokio::spawn(janitor_loop(beacon.state.clone(), config.janitor_interval()));

        beacon.tasks.lock().extend([receiver, announcer, janitor]);

        info!("UDP discovery started");
        Ok(beacon)
    }

    /// Set the local identity and broadcast it once right away
    ///
    /// The identity is stored even when the beacon has stopped. The periodic
    /// announce task picks it up on its next tick.
    pub async fn announce(&self, peer_id: &str, username: &str) -> Result<(), DiscoveryError> {
        let frame = DiscoveryFrame::new(peer_id, username, self.advertised_port)?;
        self.state.set_identity(frame.clone());

        let socket = self.socket.lock().clone();
        let Some(socket) = socket else {
            return Err(DiscoveryError::NotRunning);
        };

        Announcer::new(socket, self.state.clone(), self.targets.clone())
            .send(&frame)
            .await?;
        info!("Broadcasted peer info: {} ({})", username, peer_id);
        Ok(())
    }

    /// Fresh peers, minus blocked addresses
    pub fn discovered_peers(&self) -> HashMap<Ipv4Addr, DiscoveredPeer> {
        self.state.discovered_peers()
    }

    pub fn state(&self) -> &Arc<DiscoveryState> {
        &self.state
    }

    pub fn blocklist(&self) -> &Arc<Blocklist> {
        self.state.blocklist()
    }

    /// Destinations of every advertisement
    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }

    /// Address the discovery socket is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match &*self.socket.lock() {
            Some(socket) => socket.local_addr(),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "discovery socket closed",
            )),
        }
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Stop all tasks and close the socket. Safe to call more than once.
    pub fn shutdown(&self) {
        let was_running = !self.shutdown.send_replace(true);

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        // The socket closes once the aborted tasks release their handles
        self.socket.lock().take();

        if was_running {
            info!("UDP discovery stopped");
        }
    }
}

impl Drop for Beacon {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Limited broadcast plus the /24 directed broadcast of `local_ip`
pub fn broadcast_targets(local_ip: Ipv4Addr, port: u16) -> Vec<SocketAddr> {
    vec![
        SocketAddr::from((Ipv4Addr::BROADCAST, port)),
        SocketAddr::from((subnet_broadcast(local_ip), port)),
    ]
}

/// What the announce path needs, detached from the beacon's lifetime
struct Announcer {
    socket: Arc<UdpSocket>,
    state: Arc<DiscoveryState>,
    targets: Vec<SocketAddr>,
}

impl Announcer {
    fn new(socket: Arc<UdpSocket>, state: Arc<DiscoveryState>, targets: Vec<SocketAddr>) -> Self {
        Self {
            socket,
            state,
            targets,
        }
    }

    /// Send `frame` to every target. Fails only if no target was reached.
    async fn send(&self, frame: &DiscoveryFrame) -> std::io::Result<()> {
        let text = frame.encode(&self.state.prefix);
        let data = text.as_bytes();

        let mut last_error = None;
        let mut delivered = 0;
        for target in &self.targets {
            match self.socket.send_to(data, *target).await {
                Ok(_) => delivered += 1,
                Err(e) => {
                    debug!("Broadcast to {} failed: {}", target, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(()),
        }
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    state: Arc<DiscoveryState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, src)) => {
                    state.handle_datagram(src, &buf[..len]);
                }
                Err(e) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    error!("Error receiving UDP broadcast: {}", e);
                }
            },
        }
    }

    debug!("Discovery receive loop stopped");
}

async fn announce_loop(announcer: Announcer, period: Duration) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tick.tick().await;

        let Some(frame) = announcer.state.identity() else {
            continue;
        };
        if let Err(e) = announcer.send(&frame).await {
            debug!("Error broadcasting presence: {}", e);
        }
    }
}

async fn janitor_loop(state: Arc<DiscoveryState>, period: Duration) {
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tick.tick().await;

        let removed = state.cache.evict_stale(std::time::Instant::now());
        if removed > 0 {
            debug!("Evicted {} stale peer(s)", removed);
        }
    }
}

/// UDP socket on `0.0.0.0:port` with broadcast and address reuse enabled
fn bind_broadcast_socket(port: u16) -> Result<std::net::UdpSocket, DiscoveryError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .map_err(|source| DiscoveryError::Bind { addr, source })?;

    Ok(socket.into())
}
