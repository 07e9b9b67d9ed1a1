//! Port probing for the shell / test / child port triple.

use anyhow::{bail, Result};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

/// How far above the base the probe scans before giving up.
const SCAN_SPAN: u16 = 1000;
const PROBE_TIMEOUT: Duration = Duration::from_millis(50);

/// Lowest free TCP port strictly above `base`.
///
/// A port counts as free when a loopback connect is refused, matching how the
/// sandbox-survival check later decides a port is dead.
pub fn free_port_after(base: u16) -> Result<u16> {
    for offset in 1..=SCAN_SPAN {
        let Some(port) = base.checked_add(offset) else {
            break;
        };
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        if TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_err() {
            return Ok(port);
        }
    }
    bail!("no free port within {SCAN_SPAN} ports above {base}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn skips_a_bound_port() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let bound = listener.local_addr().unwrap().port();

        let free = free_port_after(bound - 1).unwrap();
        assert_ne!(free, bound);
        assert!(free > bound - 1);
    }

    #[test]
    fn returned_port_is_connect_refused() {
        let free = free_port_after(47000).unwrap();
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, free));
        assert!(TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_err());
    }
}
