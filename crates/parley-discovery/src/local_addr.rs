//! Local IPv4 address detection

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::debug;

/// Pick the address this host is reachable at on the LAN
///
/// Scans interfaces first; if none qualifies, asks the routing table which
/// source address would be used to reach a public host (no packet is sent).
pub fn detect_local_ipv4() -> Option<Ipv4Addr> {
    let ip = interface_ipv4().or_else(egress_ipv4);
    debug!("Detected local address: {:?}", ip);
    ip
}

/// Directed broadcast address of the /24 containing `ip`
pub fn subnet_broadcast(ip: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = ip.octets();
    Ipv4Addr::new(a, b, c, 255)
}

fn is_usable(ip: Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_link_local() && !ip.is_unspecified()
}

#[cfg(unix)]
fn interface_ipv4() -> Option<Ipv4Addr> {
    use nix::ifaddrs::getifaddrs;
    use nix::net::if_::InterfaceFlags;

    let interfaces = match getifaddrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            debug!("getifaddrs failed: {}", e);
            return None;
        }
    };

    for ifaddr in interfaces {
        if !ifaddr.flags.contains(InterfaceFlags::IFF_UP)
            || ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK)
        {
            continue;
        }

        let ip = ifaddr
            .address
            .as_ref()
            .and_then(|addr| addr.as_sockaddr_in())
            .map(|sin| Ipv4Addr::from(sin.ip()));

        if let Some(ip) = ip.filter(|ip| is_usable(*ip)) {
            debug!("Using {} from interface {}", ip, ifaddr.interface_name);
            return Some(ip);
        }
    }

    None
}

#[cfg(not(unix))]
fn interface_ipv4() -> Option<Ipv4Addr> {
    None
}

fn egress_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    // Connecting a UDP socket only selects a route
    socket.connect("8.8.8.8:80").ok()?;

    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if is_usable(ip) => Some(ip),
        _ => None,
    }
}
