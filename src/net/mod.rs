// src/net/mod.rs
//! Local networking helpers: port discovery and readiness probing

pub mod port_allocator;
pub mod readiness;

pub use port_allocator::{find_available_port, DEFAULT_PORT_RANGE, DEFAULT_PORT_START};
pub use readiness::ReadinessProbe;
