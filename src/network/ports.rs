//! Host port allocation

use crate::compose::{ComposeDocument, Protocol};
use crate::error::{FleetError, Result};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};
use std::sync::Arc;

/// Reports whether a host port is already taken outside the document
pub trait PortChecker: Send + Sync {
    /// Whether `port` is bound on the host for `protocol`
    fn is_bound(&self, port: u16, protocol: Protocol) -> bool;
}

/// Checks by attempting to bind the port locally
#[derive(Debug, Clone)]
pub struct HostPortChecker {
    bind_address: IpAddr,
}

impl HostPortChecker {
    /// Check on a specific address
    pub fn new(bind_address: IpAddr) -> Self {
        Self { bind_address }
    }
}

impl Default for HostPortChecker {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

impl PortChecker for HostPortChecker {
    fn is_bound(&self, port: u16, protocol: Protocol) -> bool {
        let addr = SocketAddr::new(self.bind_address, port);
        match protocol {
            Protocol::Udp => UdpSocket::bind(addr).is_err(),
            // SCTP cannot be checked from std; TCP is the closest signal
            Protocol::Tcp | Protocol::Sctp => TcpListener::bind(addr).is_err(),
        }
    }
}

/// Checker with a fixed set of bound ports
#[derive(Debug, Clone, Default)]
pub struct StaticPortChecker {
    bound: BTreeSet<(u16, Protocol)>,
}

impl StaticPortChecker {
    /// Treat the given TCP ports as bound
    pub fn tcp(ports: &[u16]) -> Self {
        Self {
            bound: ports.iter().map(|p| (*p, Protocol::Tcp)).collect(),
        }
    }
}

impl PortChecker for StaticPortChecker {
    fn is_bound(&self, port: u16, protocol: Protocol) -> bool {
        self.bound.contains(&(port, protocol))
    }
}

/// Provisional claim on a host port
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortReservation {
    pub port: u16,
    pub protocol: Protocol,
}

/// Port allocator
///
/// Reservations are advisory: they only keep two in-flight callers from
/// picking the same port. Once a port is attached to a committed service the
/// document itself marks it as taken and the reservation should be released.
pub struct PortAllocator {
    checker: Arc<dyn PortChecker>,
    protocol: Protocol,
    reserved: BTreeSet<PortReservation>,
}

impl PortAllocator {
    /// Create an allocator for TCP ports
    pub fn new(checker: Arc<dyn PortChecker>) -> Self {
        Self {
            checker,
            protocol: Protocol::Tcp,
            reserved: BTreeSet::new(),
        }
    }

    /// Allocate ports for another protocol
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Whether `port` is free in the document, the reservation table and on the host
    pub fn is_free(&self, document: &ComposeDocument, port: u16) -> bool {
        document.port_owner(port, self.protocol).is_none()
            && !self.reserved.contains(&PortReservation {
                port,
                protocol: self.protocol,
            })
            && !self.checker.is_bound(port, self.protocol)
    }

    /// Reserve the first `count` free ports at or above `preferred`
    pub fn reserve(
        &mut self,
        document: &ComposeDocument,
        preferred: u16,
        count: usize,
    ) -> Result<Vec<u16>> {
        let mut ports = Vec::with_capacity(count);
        if count == 0 {
            return Ok(ports);
        }

        for candidate in preferred..=u16::MAX {
            if self.is_free(document, candidate) {
                ports.push(candidate);
                if ports.len() == count {
                    break;
                }
            }
        }

        if ports.len() < count {
            return Err(FleetError::PortRangeExhausted { preferred, count });
        }

        for port in &ports {
            self.reserved.insert(PortReservation {
                port: *port,
                protocol: self.protocol,
            });
        }
        tracing::debug!("Reserved ports {:?} (preferred {})", ports, preferred);
        Ok(ports)
    }

    /// Drop reservations for `ports`
    pub fn release(&mut self, ports: &[u16]) {
        for port in ports {
            self.reserved.remove(&PortReservation {
                port: *port,
                protocol: self.protocol,
            });
        }
    }

    /// Forget every advisory reservation; state is rederived from the document
    pub fn rescan(&mut self) {
        if !self.reserved.is_empty() {
            tracing::debug!("Dropping {} uncommitted reservation(s)", self.reserved.len());
        }
        self.reserved.clear();
    }

    /// Outstanding reservations
    pub fn reservations(&self) -> impl Iterator<Item = &PortReservation> {
        self.reserved.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{PortBinding, ServiceSpec};

    fn document_with(ports: &[u16]) -> ComposeDocument {
        let mut doc = ComposeDocument::new();
        for (i, port) in ports.iter().enumerate() {
            doc.add_service(
                ServiceSpec::new(&format!("bot{}", i), "img").port(PortBinding::new(*port, 8080)),
            )
            .unwrap();
        }
        doc
    }

    fn allocator(bound: &[u16]) -> PortAllocator {
        PortAllocator::new(Arc::new(StaticPortChecker::tcp(bound)))
    }

    #[test]
    fn test_reserve_skips_document_ports() {
        let doc = document_with(&[8080, 8081]);
        let mut alloc = allocator(&[]);
        assert_eq!(alloc.reserve(&doc, 8080, 3).unwrap(), vec![8082, 8083, 8084]);
    }

    #[test]
    fn test_reserve_skips_host_bound_and_is_not_contiguous() {
        let doc = document_with(&[8080]);
        let mut alloc = allocator(&[8082]);
        assert_eq!(alloc.reserve(&doc, 8080, 2).unwrap(), vec![8081, 8083]);
    }

    #[test]
    fn test_reservations_block_until_released() {
        let doc = document_with(&[]);
        let mut alloc = allocator(&[]);

        let first = alloc.reserve(&doc, 9000, 1).unwrap();
        let second = alloc.reserve(&doc, 9000, 1).unwrap();
        assert_eq!(first, vec![9000]);
        assert_eq!(second, vec![9001]);
        assert!(!alloc.is_free(&doc, 9000));

        alloc.release(&first);
        assert!(alloc.is_free(&doc, 9000));
    }

    #[test]
    fn test_rescan_heals_leaks() {
        let doc = document_with(&[]);
        let mut alloc = allocator(&[]);
        alloc.reserve(&doc, 9000, 5).unwrap();
        alloc.rescan();
        assert_eq!(alloc.reservations().count(), 0);
        assert_eq!(alloc.reserve(&doc, 9000, 1).unwrap(), vec![9000]);
    }

    #[test]
    fn test_exhausted_range() {
        let doc = document_with(&[65534]);
        let mut alloc = allocator(&[65535]);
        let err = alloc.reserve(&doc, 65534, 1).unwrap_err();
        assert!(matches!(err, FleetError::PortRangeExhausted { preferred: 65534, count: 1 }));
        assert_eq!(alloc.reservations().count(), 0);
    }

    #[test]
    fn test_udp_ignores_tcp_bindings() {
        let doc = document_with(&[8080]);
        let mut alloc = allocator(&[8081]).with_protocol(Protocol::Udp);
        assert_eq!(alloc.reserve(&doc, 8080, 2).unwrap(), vec![8080, 8081]);
    }

    #[test]
    fn test_zero_count() {
        let doc = document_with(&[]);
        assert!(allocator(&[]).reserve(&doc, 8080, 0).unwrap().is_empty());
    }

    #[test]
    fn test_host_checker_detects_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let checker = HostPortChecker::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(checker.is_bound(port, Protocol::Tcp));
    }
}
