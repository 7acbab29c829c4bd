//! Port Allocator
//!
//! Scans upward from a preferred port for one that can be bound on all
//! interfaces. `find_open_port` only probes, so the port may be taken again
//! before the caller binds it; `bind_open_port` keeps the listener it found.

use flock_core::MAX_PORT;
use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use tokio::net::TcpListener;
use tracing::{debug, trace};

/// First port in `preferred..=MAX_PORT` that can be bound, or 0 when none can.
pub fn find_open_port(preferred: u16) -> u16 {
    find_open_port_in(preferred, MAX_PORT)
}

/// Probe `preferred..=max` sequentially, returning 0 if the range is exhausted.
pub fn find_open_port_in(preferred: u16, max: u16) -> u16 {
    if preferred == 0 {
        return 0;
    }
    for port in preferred..=max {
        match StdTcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))) {
            Ok(listener) => {
                drop(listener);
                debug!(port = port, preferred = preferred, "Found open port");
                return port;
            }
            Err(e) => trace!(port = port, error = %e, "Port unavailable"),
        }
    }
    0
}

/// Bind the first free port in `preferred..=MAX_PORT` and keep the listener.
pub async fn bind_open_port(preferred: u16) -> Option<(TcpListener, u16)> {
    if preferred == 0 {
        return None;
    }
    for port in preferred..=MAX_PORT {
        match TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await {
            Ok(listener) => {
                debug!(port = port, preferred = preferred, "Bound adoption port");
                return Some((listener, port));
            }
            Err(e) => trace!(port = port, error = %e, "Port unavailable"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupy_ephemeral() -> (StdTcpListener, u16) {
        let listener = StdTcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_returns_port_at_or_above_preferred() {
        let port = find_open_port(20000);
        assert!(port >= 20000);
        assert!(port <= MAX_PORT);
        assert!(StdTcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok());
    }

    #[test]
    fn test_skips_occupied_preferred_port() {
        let preferred = find_open_port(21000);
        let _held = StdTcpListener::bind((Ipv4Addr::UNSPECIFIED, preferred)).unwrap();

        let port = find_open_port(preferred);
        assert!(port > preferred);
    }

    #[test]
    fn test_exhausted_range_returns_zero_twice() {
        let (_held, port) = occupy_ephemeral();

        assert_eq!(find_open_port_in(port, port), 0);
        assert_eq!(find_open_port_in(port, port), 0);
    }

    #[test]
    fn test_zero_preferred_is_exhausted() {
        assert_eq!(find_open_port(0), 0);
    }

    #[tokio::test]
    async fn test_bind_open_port_holds_listener() {
        let (listener, port) = bind_open_port(22000).await.unwrap();
        assert!(port >= 22000);
        assert_eq!(listener.local_addr().unwrap().port(), port);

        // Held, so a probe starting there must move past it
        assert_ne!(find_open_port_in(port, port), port);
    }
}
