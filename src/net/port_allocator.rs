// src/net/port_allocator.rs
//! Free local TCP port discovery

use crate::utils::errors::{EngineError, Result};
use std::net::{Ipv4Addr, TcpListener};
use tracing::{debug, trace};

/// First port tried by default (XMPP client port)
pub const DEFAULT_PORT_START: u16 = 5222;

/// Ports scanned by default
pub const DEFAULT_PORT_RANGE: u16 = 100;

/// Return the first port in `start..start + range_size` that can be bound on
/// the loopback interface. The probe socket is closed before returning.
pub fn find_available_port(start: u16, range_size: u16) -> Result<u16> {
    let end = u32::from(start) + u32::from(range_size);

    for port in u32::from(start)..end.min(u32::from(u16::MAX) + 1) {
        let port = port as u16;
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => {
                drop(listener);
                debug!(port, "found available port");
                return Ok(port);
            }
            Err(e) => trace!(port, error = %e, "port unavailable"),
        }
    }

    Err(EngineError::NoPortAvailable {
        start,
        range: range_size,
    })
}
