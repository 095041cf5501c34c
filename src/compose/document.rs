//! Canonical compose document
//!
//! All mutations go through [`ComposeDocument`] so the two document invariants
//! are checked in one place:
//!
//! - every network a service references is declared
//! - no two bindings publish the same host port for the same protocol
//!
//! Mutations validate first and apply second; a failed call leaves the
//! document untouched.

use super::config::{NetworkSpec, Protocol, ServiceSpec, VolumeSpec};
use crate::error::{FleetError, Result};
use crate::network::NetworkGuard;
use serde_yaml::Mapping;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Document handle shared by the components of one deployment
pub type SharedDocument = Arc<RwLock<ComposeDocument>>;

/// Services, networks and volumes of one deployment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposeDocument {
    services: Vec<ServiceSpec>,
    networks: Vec<NetworkSpec>,
    volumes: Vec<VolumeSpec>,
    /// Top-level keys this model does not interpret
    extra: Mapping,
}

impl ComposeDocument {
    /// Wrap the document in a shared handle
    pub fn into_shared(self) -> SharedDocument {
        Arc::new(RwLock::new(self))
    }

    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty document with one bridge network
    pub fn bootstrap(network: &str) -> Self {
        Self {
            networks: vec![NetworkSpec::bridge(network)],
            ..Self::default()
        }
    }

    /// Assemble a document without checking invariants; call [`validate`](Self::validate)
    pub(crate) fn from_parts(
        services: Vec<ServiceSpec>,
        networks: Vec<NetworkSpec>,
        volumes: Vec<VolumeSpec>,
        extra: Mapping,
    ) -> Self {
        Self {
            services,
            networks,
            volumes,
            extra,
        }
    }

    /// Services in document order
    pub fn list_services(&self) -> &[ServiceSpec] {
        &self.services
    }

    /// Networks in document order
    pub fn networks(&self) -> &[NetworkSpec] {
        &self.networks
    }

    /// Volumes in document order
    pub fn volumes(&self) -> &[VolumeSpec] {
        &self.volumes
    }

    /// Unmodelled top-level keys
    pub fn extra(&self) -> &Mapping {
        &self.extra
    }

    /// Get service by name
    pub fn get_service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Get network by name
    pub fn get_network(&self, name: &str) -> Option<&NetworkSpec> {
        self.networks.iter().find(|n| n.name == name)
    }

    /// Get volume by name
    pub fn get_volume(&self, name: &str) -> Option<&VolumeSpec> {
        self.volumes.iter().find(|v| v.name == name)
    }

    /// Add a service
    pub fn add_service(&mut self, spec: ServiceSpec) -> Result<()> {
        if self.get_service(&spec.name).is_some() {
            return Err(FleetError::DuplicateName(spec.name));
        }
        self.check_service(&spec, None)?;

        tracing::debug!("Adding service {}", spec.name);
        self.services.push(spec);
        Ok(())
    }

    /// Replace an existing service, keeping its position
    pub fn update_service(&mut self, spec: ServiceSpec) -> Result<()> {
        let index = self
            .services
            .iter()
            .position(|s| s.name == spec.name)
            .ok_or_else(|| FleetError::ServiceNotFound(spec.name.clone()))?;
        self.check_service(&spec, Some(&spec.name))?;

        tracing::debug!("Updating service {}", spec.name);
        self.services[index] = spec;
        Ok(())
    }

    /// Remove a service, releasing its ports and network references
    pub fn remove_service(&mut self, name: &str) -> Result<ServiceSpec> {
        let index = self
            .services
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| FleetError::ServiceNotFound(name.to_string()))?;

        tracing::debug!("Removing service {}", name);
        Ok(self.services.remove(index))
    }

    /// Add a network
    pub fn add_network(&mut self, spec: NetworkSpec) -> Result<()> {
        if self.get_network(&spec.name).is_some() {
            return Err(FleetError::DuplicateName(spec.name));
        }
        check_name("network", &spec.name)?;

        self.networks.push(spec);
        Ok(())
    }

    /// Remove a network that no service references
    pub fn remove_network(&mut self, name: &str) -> Result<NetworkSpec> {
        let index = self
            .networks
            .iter()
            .position(|n| n.name == name)
            .ok_or_else(|| FleetError::NetworkNotFound(name.to_string()))?;

        let check = NetworkGuard::can_delete(self, name);
        if !check.deletable {
            return Err(FleetError::NetworkInUse {
                network: name.to_string(),
                services: check.blocking,
            });
        }

        Ok(self.networks.remove(index))
    }

    /// Add a named volume
    pub fn add_volume(&mut self, spec: VolumeSpec) -> Result<()> {
        if self.get_volume(&spec.name).is_some() {
            return Err(FleetError::DuplicateName(spec.name));
        }
        check_name("volume", &spec.name)?;

        self.volumes.push(spec);
        Ok(())
    }

    /// Remove a named volume that no service mounts
    pub fn remove_volume(&mut self, name: &str) -> Result<VolumeSpec> {
        let index = self
            .volumes
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| FleetError::VolumeNotFound(name.to_string()))?;

        let users: Vec<String> = self
            .services
            .iter()
            .filter(|s| {
                s.volumes
                    .iter()
                    .any(|v| v.is_named_volume() && v.source.as_deref() == Some(name))
            })
            .map(|s| s.name.clone())
            .collect();
        if !users.is_empty() {
            return Err(FleetError::VolumeInUse {
                volume: name.to_string(),
                services: users,
            });
        }

        Ok(self.volumes.remove(index))
    }

    /// Every published host port with the service owning it
    pub fn bound_ports(&self) -> BTreeMap<(u16, Protocol), String> {
        let mut ports = BTreeMap::new();
        for service in &self.services {
            for key in service.host_ports() {
                ports.entry(key).or_insert_with(|| service.name.clone());
            }
        }
        ports
    }

    /// Service publishing `port`, if any
    pub fn port_owner(&self, port: u16, protocol: Protocol) -> Option<&str> {
        self.services
            .iter()
            .find(|s| s.host_ports().any(|key| key == (port, protocol)))
            .map(|s| s.name.as_str())
    }

    /// Check every invariant of the whole document
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for network in &self.networks {
            check_name("network", &network.name)?;
            if !names.insert(("network", network.name.as_str())) {
                return Err(FleetError::DuplicateName(network.name.clone()));
            }
        }
        for volume in &self.volumes {
            check_name("volume", &volume.name)?;
            if !names.insert(("volume", volume.name.as_str())) {
                return Err(FleetError::DuplicateName(volume.name.clone()));
            }
        }

        let mut seen = BTreeMap::new();
        for service in &self.services {
            if !names.insert(("service", service.name.as_str())) {
                return Err(FleetError::DuplicateName(service.name.clone()));
            }
            check_name("service", &service.name)?;
            self.check_container_name(service)?;
            self.check_networks(service)?;
            for key in service.host_ports() {
                if let Some(owner) = seen.insert(key, service.name.clone()) {
                    return Err(FleetError::PortConflict {
                        port: key.0,
                        protocol: key.1.to_string(),
                        owner,
                    });
                }
            }
        }
        Ok(())
    }

    /// Check a service against the document, ignoring the bindings of `replacing`
    fn check_service(&self, spec: &ServiceSpec, replacing: Option<&str>) -> Result<()> {
        check_name("service", &spec.name)?;
        if spec.image.trim().is_empty() {
            return Err(FleetError::DocumentInvalid(format!(
                "service '{}' has no image",
                spec.name
            )));
        }

        self.check_container_name(spec)?;

        let mut own = HashSet::new();
        for (port, protocol) in spec.host_ports() {
            if !own.insert((port, protocol)) {
                return Err(FleetError::PortConflict {
                    port,
                    protocol: protocol.to_string(),
                    owner: spec.name.clone(),
                });
            }
            if let Some(owner) = self.port_owner(port, protocol) {
                if Some(owner) != replacing {
                    return Err(FleetError::PortConflict {
                        port,
                        protocol: protocol.to_string(),
                        owner: owner.to_string(),
                    });
                }
            }
        }

        self.check_networks(spec)
    }

    /// A container name may not collide with another service's name or container
    fn check_container_name(&self, spec: &ServiceSpec) -> Result<()> {
        let container = spec.container_name();
        if spec.container_name.is_some() {
            check_name("container", container)?;
        }

        let clash = self
            .services
            .iter()
            .filter(|other| other.name != spec.name)
            .any(|other| {
                other.name == container
                    || other.container_name() == container
                    || other.container_name() == spec.name
            });
        if clash {
            return Err(FleetError::DuplicateName(container.to_string()));
        }
        Ok(())
    }

    fn check_networks(&self, spec: &ServiceSpec) -> Result<()> {
        for network in spec.network_names() {
            if self.get_network(network).is_none() {
                return Err(FleetError::UnknownNetwork {
                    service: spec.name.clone(),
                    network: network.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Names double as container and network names on the runtime
fn check_name(kind: &str, name: &str) -> Result<()> {
    let valid = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if valid {
        Ok(())
    } else {
        Err(FleetError::DocumentInvalid(format!(
            "invalid {} name '{}'",
            kind, name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::PortBinding;

    fn bot(name: &str, port: u16) -> ServiceSpec {
        ServiceSpec::new(name, "freqtradeorg/freqtrade:stable")
            .port(PortBinding::new(port, 8080))
            .network("net1")
    }

    fn document() -> ComposeDocument {
        let mut doc = ComposeDocument::new();
        doc.add_network(NetworkSpec::bridge("net1")).unwrap();
        doc
    }

    #[test]
    fn test_add_then_remove_restores_document() {
        let mut doc = document();
        doc.add_service(bot("bot1", 8080)).unwrap();
        let before = doc.clone();
        let ports_before = doc.bound_ports();

        doc.add_service(bot("bot2", 8081)).unwrap();
        doc.remove_service("bot2").unwrap();

        assert_eq!(doc, before);
        assert_eq!(doc.bound_ports(), ports_before);
    }

    #[test]
    fn test_duplicate_name() {
        let mut doc = document();
        doc.add_service(bot("bot1", 8080)).unwrap();
        let err = doc.add_service(bot("bot1", 8081)).unwrap_err();
        assert!(matches!(err, FleetError::DuplicateName(name) if name == "bot1"));
    }

    #[test]
    fn test_container_name_collision() {
        let mut doc = document();
        doc.add_service(bot("bot1", 8080)).unwrap();

        let mut squatter = bot("bot2", 8081);
        squatter.container_name = Some("bot1".into());
        let err = doc.add_service(squatter).unwrap_err();
        assert!(matches!(err, FleetError::DuplicateName(ref name) if name == "bot1"));

        let mut named = bot("bot2", 8081);
        named.container_name = Some("freqtrade-bot2".into());
        doc.add_service(named).unwrap();

        let mut clash = bot("bot3", 8082);
        clash.container_name = Some("freqtrade-bot2".into());
        assert!(matches!(
            doc.add_service(clash),
            Err(FleetError::DuplicateName(_))
        ));

        // A service named after an existing container is also rejected
        assert!(matches!(
            doc.add_service(bot("freqtrade-bot2", 8083)),
            Err(FleetError::DuplicateName(_))
        ));

        let mut renamed = bot("bot2", 8081);
        renamed.container_name = Some("bot1".into());
        assert!(matches!(
            doc.update_service(renamed),
            Err(FleetError::DuplicateName(_))
        ));
        assert_eq!(doc.list_services().len(), 2);
    }

    #[test]
    fn test_port_conflict_leaves_document_unchanged() {
        let mut doc = document();
        doc.add_service(bot("bot1", 8080)).unwrap();
        let before = doc.clone();

        let err = doc.add_service(bot("bot2", 8080)).unwrap_err();
        assert!(matches!(err, FleetError::PortConflict { port: 8080, ref owner, .. } if owner == "bot1"));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_port_conflict_within_service() {
        let mut doc = document();
        let spec = bot("bot1", 8080).port(PortBinding::new(8080, 9090));
        assert!(matches!(
            doc.add_service(spec),
            Err(FleetError::PortConflict { .. })
        ));
    }

    #[test]
    fn test_same_port_different_protocol() {
        let mut doc = document();
        doc.add_service(bot("bot1", 8080)).unwrap();
        let udp = ServiceSpec::new("dns", "coredns")
            .port(PortBinding::new(8080, 53).protocol(Protocol::Udp));
        doc.add_service(udp).unwrap();
        assert_eq!(doc.bound_ports().len(), 2);
    }

    #[test]
    fn test_unknown_network() {
        let mut doc = ComposeDocument::new();
        let err = doc.add_service(bot("bot1", 8080)).unwrap_err();
        assert!(matches!(err, FleetError::UnknownNetwork { ref network, .. } if network == "net1"));
        assert!(doc.list_services().is_empty());
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut doc = document();
        for (i, name) in ["zeta", "alpha", "mid"].iter().enumerate() {
            doc.add_service(bot(name, 8080 + i as u16)).unwrap();
        }
        let names: Vec<_> = doc.list_services().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_update_service_keeps_own_ports() {
        let mut doc = document();
        doc.add_service(bot("bot1", 8080)).unwrap();
        doc.add_service(bot("bot2", 8081)).unwrap();

        let updated = bot("bot1", 8080).env("FREQTRADE_STRATEGY", "ichiV1");
        doc.update_service(updated).unwrap();
        assert_eq!(doc.get_service("bot1").unwrap().environment.len(), 1);
        assert_eq!(doc.list_services()[0].name, "bot1");

        let clash = bot("bot1", 8081);
        assert!(matches!(
            doc.update_service(clash),
            Err(FleetError::PortConflict { .. })
        ));
        assert!(matches!(
            doc.update_service(bot("ghost", 9000)),
            Err(FleetError::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_remove_missing_service() {
        let mut doc = document();
        assert!(matches!(
            doc.remove_service("bot1"),
            Err(FleetError::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_network_lifecycle_scenario() {
        let mut doc = ComposeDocument::new();
        doc.add_network(NetworkSpec::bridge("net1")).unwrap();
        doc.add_service(bot("bot1", 8080)).unwrap();

        assert!(!NetworkGuard::can_delete(&doc, "net1").deletable);
        let before = doc.clone();
        match doc.remove_network("net1") {
            Err(FleetError::NetworkInUse { services, .. }) => assert_eq!(services, vec!["bot1"]),
            other => panic!("expected NetworkInUse, got {:?}", other),
        }
        assert_eq!(doc, before);

        doc.remove_service("bot1").unwrap();
        doc.remove_network("net1").unwrap();
        assert!(doc.networks().is_empty());
    }

    #[test]
    fn test_volume_in_use() {
        let mut doc = document();
        doc.add_volume(VolumeSpec::new("userdata_bot1")).unwrap();
        let spec = bot("bot1", 8080).volume(crate::compose::VolumeBind::new(
            "userdata_bot1",
            "/freqtrade/user_data",
        ));
        doc.add_service(spec).unwrap();

        assert!(matches!(
            doc.remove_volume("userdata_bot1"),
            Err(FleetError::VolumeInUse { .. })
        ));
        doc.remove_service("bot1").unwrap();
        doc.remove_volume("userdata_bot1").unwrap();
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut doc = document();
        assert!(matches!(
            doc.add_service(ServiceSpec::new("bad name", "img")),
            Err(FleetError::DocumentInvalid(_))
        ));
        assert!(matches!(
            doc.add_network(NetworkSpec::bridge("")),
            Err(FleetError::DocumentInvalid(_))
        ));
    }

    #[test]
    fn test_port_uniqueness_after_mixed_operations() {
        let mut doc = document();
        for i in 0..10u16 {
            let _ = doc.add_service(bot(&format!("bot{}", i), 8080 + (i % 4)));
            if i % 3 == 0 {
                let _ = doc.remove_service(&format!("bot{}", i / 2));
            }
        }
        let mut seen = HashSet::new();
        for service in doc.list_services() {
            for key in service.host_ports() {
                assert!(seen.insert(key));
            }
        }
        doc.validate().unwrap();
    }
}
