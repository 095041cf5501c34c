//! Container management module
//!
//! This module turns compose services into containers and tracks their
//! lifecycle through a pluggable [`ContainerRuntime`].

pub mod config;
pub mod docker;
pub mod lifecycle;
pub mod runtime;
pub mod socket;

pub use config::{
    ContainerConfig, LifecycleState, PortMapping, RuntimeStatus, StatusReport, VolumeMount,
};
pub use docker::{DockerApiRuntime, DEFAULT_DOCKER_HOST};
pub use lifecycle::{LifecycleController, StatusCache, DEFAULT_OP_TIMEOUT, DEFAULT_STATUS_TTL};
pub use runtime::{ContainerRuntime, MemoryRuntime};
pub use socket::{SocketClient, SocketResponse};
