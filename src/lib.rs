//! freqfleet - compose orchestration for a fleet of trading bots
//!
//! freqfleet keeps a docker compose file describing many trading bot
//! containers and drives those containers through a container engine:
//!
//! - Compose document model with port and network integrity checks
//! - Round-trip YAML persistence with backups
//! - Host port allocation
//! - Trading config composition from templates
//! - Container lifecycle and status tracking

pub mod compose;
pub mod config;
pub mod container;
pub mod error;
pub mod network;
pub mod template;

pub use config::FleetConfig;
pub use error::{ErrorClass, FleetError, Result};
