//! Network and host port bookkeeping
//!
//! This module guards network deletion and hands out host ports.

pub mod guard;
pub mod ports;

pub use guard::{DeleteCheck, NetworkGuard};
pub use ports::{HostPortChecker, PortAllocator, PortChecker, PortReservation, StaticPortChecker};
