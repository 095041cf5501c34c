//! Compose file model and orchestration
//!
//! The compose file is the source of truth for the fleet. It is loaded into a
//! [`ComposeDocument`], changed only through its checked operations, and
//! written back by [`ComposeSync`].

pub mod config;
pub mod document;
pub mod orchestrator;
pub mod parser;
pub mod sync;

pub use config::{
    CommandSpec, GpuReservation, NetworkFlags, NetworkSpec, PortBinding, Protocol, RestartPolicy,
    ServiceNetwork, ServiceSpec, VolumeBind, VolumeSpec,
};
pub use document::{ComposeDocument, SharedDocument};
pub use orchestrator::{BotRequest, DeployedBot, FleetOrchestrator, BOT_API_PORT};
pub use parser::ComposeParser;
pub use sync::ComposeSync;
