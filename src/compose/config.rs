//! Compose document model types

use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Network protocol of a port binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            other => Err(format!("unknown protocol '{}'", other)),
        }
    }
}

/// Port binding of a service
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PortBinding {
    /// Address to bind on the host
    pub host_ip: Option<String>,
    /// Published port on the host (`None` lets the runtime pick one)
    pub host_port: Option<u16>,
    /// Target port in the container
    pub container_port: u16,
    /// Protocol
    pub protocol: Protocol,
    /// Unmodelled keys of the long syntax; `Some` keeps the long form on save
    pub long_form: Option<Mapping>,
}

impl PortBinding {
    /// Bind `host_port` to `container_port` over TCP on all interfaces
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port: Some(host_port),
            container_port,
            ..Self::default()
        }
    }

    /// Set the host address
    pub fn host_ip(mut self, ip: &str) -> Self {
        self.host_ip = Some(ip.to_string());
        self
    }

    /// Set the protocol
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Short syntax: `[ip:][host:]container[/proto]`
    pub fn to_short_syntax(&self) -> String {
        let mut out = String::new();
        if let Some(ip) = &self.host_ip {
            out.push_str(ip);
            out.push(':');
        }
        if let Some(port) = self.host_port {
            out.push_str(&port.to_string());
            out.push(':');
        } else if self.host_ip.is_some() {
            out.push(':');
        }
        out.push_str(&self.container_port.to_string());
        if self.protocol != Protocol::Tcp {
            out.push('/');
            out.push_str(&self.protocol.to_string());
        }
        out
    }
}

/// Volume or bind mount of a service
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VolumeBind {
    /// Host path or named volume (`None` for anonymous volumes)
    pub source: Option<String>,
    /// Path in the container
    pub target: String,
    /// Mount options such as `ro` or `rw,z`
    pub options: Option<String>,
    /// Unmodelled keys of the long syntax; `Some` keeps the long form on save
    pub long_form: Option<Mapping>,
}

impl VolumeBind {
    /// Mount `source` at `target`
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: Some(source.to_string()),
            target: target.to_string(),
            ..Self::default()
        }
    }

    /// Mount read-only
    pub fn read_only(mut self) -> Self {
        self.options = Some("ro".to_string());
        self
    }

    /// Whether the mount is read-only
    pub fn is_read_only(&self) -> bool {
        self.options
            .as_deref()
            .map(|o| o.split(',').any(|opt| opt == "ro"))
            .unwrap_or(false)
    }

    /// Whether the source names a volume rather than a host path
    pub fn is_named_volume(&self) -> bool {
        match &self.source {
            Some(source) => {
                !source.starts_with('.')
                    && !source.starts_with('/')
                    && !source.starts_with('~')
                    && !source.contains('/')
            }
            None => false,
        }
    }

    /// Short syntax: `[source:]target[:options]`
    pub fn to_short_syntax(&self) -> String {
        let mut out = String::new();
        if let Some(source) = &self.source {
            out.push_str(source);
            out.push(':');
        }
        out.push_str(&self.target);
        if let Some(options) = &self.options {
            out.push(':');
            out.push_str(options);
        }
        out
    }
}

/// Network membership of a service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceNetwork {
    /// Network name
    pub name: String,
    /// Per-network attachment options (aliases, ipv4_address, ...)
    pub options: Option<Value>,
}

impl ServiceNetwork {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            options: None,
        }
    }
}

/// Command configuration
#[derive(Debug, Clone, PartialEq)]
pub enum CommandSpec {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

impl CommandSpec {
    /// Arguments as passed to the container entrypoint
    pub fn to_args(&self) -> Vec<String> {
        match self {
            CommandSpec::Shell(s) => s.split_whitespace().map(str::to_string).collect(),
            CommandSpec::Exec(args) => args.clone(),
        }
    }
}

/// Restart policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure(Option<u32>),
    UnlessStopped,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::No => write!(f, "no"),
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::OnFailure(None) => write!(f, "on-failure"),
            RestartPolicy::OnFailure(Some(n)) => write!(f, "on-failure:{}", n),
            RestartPolicy::UnlessStopped => write!(f, "unless-stopped"),
        }
    }
}

impl FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no" | "none" => Ok(RestartPolicy::No),
            "always" => Ok(RestartPolicy::Always),
            "unless-stopped" => Ok(RestartPolicy::UnlessStopped),
            "on-failure" => Ok(RestartPolicy::OnFailure(None)),
            other => match other.strip_prefix("on-failure:") {
                Some(n) => n
                    .parse()
                    .map(|n| RestartPolicy::OnFailure(Some(n)))
                    .map_err(|_| format!("invalid retry count in restart policy '{}'", other)),
                None => Err(format!("unknown restart policy '{}'", other)),
            },
        }
    }
}

/// GPU device reservation (`deploy.resources.reservations.devices`)
#[derive(Debug, Clone, PartialEq)]
pub struct GpuReservation {
    /// Device driver, e.g. `nvidia`
    pub driver: String,
    /// Number of devices (`None` means all)
    pub count: Option<i64>,
}

impl GpuReservation {
    pub fn new(driver: &str) -> Self {
        Self {
            driver: driver.to_string(),
            count: Some(1),
        }
    }
}

/// Service definition
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    /// Service name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Explicit container name, if it differs from the service name
    pub container_name: Option<String>,
    /// Volume mounts, in file order
    pub volumes: Vec<VolumeBind>,
    /// Port bindings, in file order
    pub ports: Vec<PortBinding>,
    /// Networks to connect to
    pub networks: Vec<ServiceNetwork>,
    /// Command to run
    pub command: Option<CommandSpec>,
    /// Environment entries as `KEY=value`
    pub environment: Vec<String>,
    /// Restart policy
    pub restart: Option<RestartPolicy>,
    /// GPU reservation
    pub gpu: Option<GpuReservation>,
    /// Keys this model does not interpret, in file order
    pub extra: Mapping,
}

impl ServiceSpec {
    /// Create a service running `image`
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            container_name: None,
            volumes: Vec::new(),
            ports: Vec::new(),
            networks: Vec::new(),
            command: None,
            environment: Vec::new(),
            restart: None,
            gpu: None,
            extra: Mapping::new(),
        }
    }

    /// Container name used against the runtime
    pub fn container_name(&self) -> &str {
        self.container_name.as_deref().unwrap_or(&self.name)
    }

    /// Add port binding
    pub fn port(mut self, binding: PortBinding) -> Self {
        self.ports.push(binding);
        self
    }

    /// Add volume mount
    pub fn volume(mut self, bind: VolumeBind) -> Self {
        self.volumes.push(bind);
        self
    }

    /// Join a network
    pub fn network(mut self, name: &str) -> Self {
        if !self.networks.iter().any(|n| n.name == name) {
            self.networks.push(ServiceNetwork::new(name));
        }
        self
    }

    /// Set command
    pub fn command(mut self, command: CommandSpec) -> Self {
        self.command = Some(command);
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.environment.push(format!("{}={}", key, value));
        self
    }

    /// Set restart policy
    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = Some(policy);
        self
    }

    /// Reserve GPUs
    pub fn gpu(mut self, reservation: GpuReservation) -> Self {
        self.gpu = Some(reservation);
        self
    }

    /// Names of the networks this service joins
    pub fn network_names(&self) -> impl Iterator<Item = &str> {
        self.networks.iter().map(|n| n.name.as_str())
    }

    /// Host ports this service publishes
    pub fn host_ports(&self) -> impl Iterator<Item = (u16, Protocol)> + '_ {
        self.ports
            .iter()
            .filter_map(|p| p.host_port.map(|port| (port, p.protocol)))
    }
}

/// Boolean network flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkFlags {
    pub internal: Option<bool>,
    pub attachable: Option<bool>,
    pub external: Option<bool>,
    pub enable_ipv6: Option<bool>,
}

/// Network definition
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSpec {
    /// Network name
    pub name: String,
    /// Driver, e.g. `bridge`
    pub driver: Option<String>,
    /// Flags
    pub flags: NetworkFlags,
    /// Keys this model does not interpret
    pub extra: Mapping,
}

impl NetworkSpec {
    /// Create a network with the given driver
    pub fn new(name: &str, driver: &str) -> Self {
        Self {
            name: name.to_string(),
            driver: Some(driver.to_string()),
            flags: NetworkFlags::default(),
            extra: Mapping::new(),
        }
    }

    /// Create a bridge network
    pub fn bridge(name: &str) -> Self {
        Self::new(name, "bridge")
    }

    /// Driver to request from the runtime
    pub fn driver_or_default(&self) -> &str {
        self.driver.as_deref().unwrap_or("bridge")
    }
}

/// Volume definition
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSpec {
    /// Volume name
    pub name: String,
    /// Driver
    pub driver: Option<String>,
    /// Driver options
    pub driver_opts: BTreeMap<String, String>,
    /// Keys this model does not interpret
    pub extra: Mapping,
}

impl VolumeSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            driver: None,
            driver_opts: BTreeMap::new(),
            extra: Mapping::new(),
        }
    }
}
