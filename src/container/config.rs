//! Container configuration and status

use crate::compose::{GpuReservation, Protocol, RestartPolicy, ServiceSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Container lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// No container exists for the service
    Absent,
    /// Container is created but was never started
    Created,
    /// Container is running
    Running,
    /// Container has stopped or exited
    Stopped,
    /// Container is being restarted by the runtime
    Restarting,
    /// Container is being removed
    Removed,
    /// Container is dead or an operation on it failed
    Error,
}

impl LifecycleState {
    /// Whether the container is up or coming up
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Restarting)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Absent => write!(f, "absent"),
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Restarting => write!(f, "restarting"),
            LifecycleState::Removed => write!(f, "removed"),
            LifecycleState::Error => write!(f, "error"),
        }
    }
}

/// State reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RuntimeStatus {
    pub fn new(state: LifecycleState) -> Self {
        Self { state, reason: None }
    }

    pub fn with_reason(state: LifecycleState, reason: &str) -> Self {
        Self {
            state,
            reason: Some(reason.to_string()),
        }
    }
}

/// Status of one service as observed at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub service: String,
    pub container: String,
    pub status: RuntimeStatus,
    pub observed_at: DateTime<Utc>,
    /// Set when the report comes from the cache after a failed live query
    pub stale: bool,
}

impl StatusReport {
    pub fn new(service: &str, container: &str, status: RuntimeStatus) -> Self {
        Self {
            service: service.to_string(),
            container: container.to_string(),
            status,
            observed_at: Utc::now(),
            stale: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.status.state
    }
}

/// Port mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
}

/// Volume mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Absolute host path, named volume, or `None` for an anonymous volume
    pub source: Option<String>,
    pub target: String,
    /// Mount options such as `ro` or `rw,z`
    pub options: Option<String>,
}

impl VolumeMount {
    /// `source:target[:options]` as accepted by the engine's bind list
    pub fn to_bind(&self) -> Option<String> {
        let source = self.source.as_ref()?;
        Some(match &self.options {
            Some(options) => format!("{}:{}:{}", source, self.target, options),
            None => format!("{}:{}", source, self.target),
        })
    }
}

/// Everything the runtime needs to provision a service's container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    /// Container name
    pub name: String,
    /// Compose service name
    pub service: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub networks: Vec<String>,
    pub restart: Option<RestartPolicy>,
    pub gpu: Option<GpuReservation>,
}

impl ContainerConfig {
    /// Build from a service, resolving relative bind sources against `project_dir`
    pub fn from_service(spec: &ServiceSpec, project_dir: &Path) -> Self {
        let volumes = spec
            .volumes
            .iter()
            .map(|bind| {
                let source = bind.source.as_ref().map(|source| {
                    if bind.is_named_volume() {
                        source.clone()
                    } else {
                        resolve_bind_source(source, project_dir)
                    }
                });
                VolumeMount {
                    source,
                    target: bind.target.clone(),
                    options: bind.options.clone(),
                }
            })
            .collect();

        let ports = spec
            .ports
            .iter()
            .map(|p| PortMapping {
                host_ip: p.host_ip.clone(),
                host_port: p.host_port,
                container_port: p.container_port,
                protocol: p.protocol,
            })
            .collect();

        Self {
            name: spec.container_name().to_string(),
            service: spec.name.clone(),
            image: spec.image.clone(),
            cmd: spec.command.as_ref().map(|c| c.to_args()).unwrap_or_default(),
            env: spec.environment.clone(),
            ports,
            volumes,
            networks: spec.network_names().map(str::to_string).collect(),
            restart: spec.restart.clone(),
            gpu: spec.gpu.clone(),
        }
    }
}

fn resolve_bind_source(source: &str, project_dir: &Path) -> String {
    if let Some(rest) = source.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    let path = Path::new(source);
    if path.is_absolute() {
        return source.to_string();
    }
    let relative = source.strip_prefix("./").unwrap_or(source);
    project_dir.join(relative).to_string_lossy().into_owned()
}
