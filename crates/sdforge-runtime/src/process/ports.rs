//! Port allocation utilities for server processes.

use std::net::TcpListener;

use anyhow::{Result, anyhow};
use tracing::debug;

/// Check if a port is available by attempting to bind to it.
/// The listener is dropped immediately, which releases the port.
pub fn is_port_available(port: u16) -> bool {
    match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener.local_addr().is_ok(),
        Err(_) => false,
    }
}

/// Find an available port starting from `base_port`, skipping ports already
/// claimed by tracked processes.
pub fn allocate_port(base_port: u16, used_ports: &[u16]) -> Result<u16> {
    const MAX_ATTEMPTS: u16 = 100;

    for offset in 0..MAX_ATTEMPTS {
        let Some(port) = base_port.checked_add(offset) else {
            break;
        };

        if used_ports.contains(&port) {
            continue;
        }

        if is_port_available(port) {
            debug!(port = %port, "Allocated available port");
            return Ok(port);
        }
        debug!(port = %port, "Port unavailable on system, skipping");
    }

    Err(anyhow!(
        "No available port found in range {}-{}",
        base_port,
        base_port.saturating_add(MAX_ATTEMPTS - 1)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_skips_used_ports() {
        let port = allocate_port(21400, &[21400, 21401]).expect("allocate");
        assert!(port >= 21402);
    }

    #[test]
    fn allocate_skips_bound_ports() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let bound = listener.local_addr().expect("addr").port();

        let port = allocate_port(bound, &[]).expect("allocate");
        assert_ne!(port, bound);
    }

    #[test]
    fn bound_port_reports_unavailable() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let bound = listener.local_addr().expect("addr").port();
        assert!(!is_port_available(bound));
    }
}
