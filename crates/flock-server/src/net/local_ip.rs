//! Self-IP Resolution

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// Routable address used only to pick the outbound interface; nothing is sent.
const ROUTE_PROBE: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 80);

/// Local address of the interface that routes toward the outside world.
///
/// Fails when the host has no route to `ROUTE_PROBE`.
pub fn current_local_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(ROUTE_PROBE)?;
    let ip = socket.local_addr()?.ip();
    if ip.is_unspecified() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no route to determine local address",
        ));
    }
    Ok(ip)
}

/// The configured override when present, otherwise the routed local address.
pub fn resolve_self_ip(configured: Option<IpAddr>) -> io::Result<IpAddr> {
    match configured {
        Some(ip) => Ok(ip),
        None => current_local_ip(),
    }
}
