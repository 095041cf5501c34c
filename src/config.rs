//! Fleet configuration
//!
//! Defaults, overridden by environment variables (a `.env` file in the working
//! directory is loaded first), overridden in turn by command line flags.

use crate::container::{DEFAULT_DOCKER_HOST, DEFAULT_OP_TIMEOUT, DEFAULT_STATUS_TTL};
use crate::error::{FleetError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Image used for new bots
pub const DEFAULT_IMAGE: &str = "freqtradeorg/freqtrade:stable";

/// First host port handed to a new bot
pub const DEFAULT_BASE_PORT: u16 = 8080;

/// Network every bot joins
pub const DEFAULT_NETWORK: &str = "freqtrade_network";

/// Fleet configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FleetConfig {
    /// Compose file managed by freqfleet
    pub compose_file: PathBuf,
    /// Host directory mounted into every bot as `/freqtrade/user_data`
    pub user_data_dir: PathBuf,
    /// Image for new bots
    pub image: String,
    /// Preferred host port for the first bot
    pub base_port: u16,
    /// Network new bots join
    pub network: String,
    /// GPU driver to reserve a device from, if any
    pub gpu_driver: Option<String>,
    /// Docker Engine address
    pub docker_host: String,
    /// How long a status observation is reused
    pub status_ttl: Duration,
    /// Timeout for a single runtime call
    pub op_timeout: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            compose_file: PathBuf::from("docker-compose.yml"),
            user_data_dir: PathBuf::from("user_data"),
            image: DEFAULT_IMAGE.to_string(),
            base_port: DEFAULT_BASE_PORT,
            network: DEFAULT_NETWORK.to_string(),
            gpu_driver: None,
            docker_host: DEFAULT_DOCKER_HOST.to_string(),
            status_ttl: DEFAULT_STATUS_TTL,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

impl FleetConfig {
    /// Defaults overridden by `.env` and the process environment
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self::from_vars(std::env::vars())
    }

    /// Defaults overridden by the given variables
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "FREQFLEET_COMPOSE_FILE" => config.compose_file = PathBuf::from(value),
                "FREQFLEET_USER_DATA" => config.user_data_dir = PathBuf::from(value),
                "FREQTRADE_IMAGE" => config.image = value.to_string(),
                "BASE_PORT" => config.base_port = parse_var("BASE_PORT", value)?,
                "FREQFLEET_NETWORK" => config.network = value.to_string(),
                "GPU_DRIVER" => config.gpu_driver = Some(value.to_string()),
                "DOCKER_HOST" => config.docker_host = value.to_string(),
                "FREQFLEET_STATUS_TTL_SECS" => {
                    config.status_ttl =
                        Duration::from_secs(parse_var("FREQFLEET_STATUS_TTL_SECS", value)?)
                }
                "FREQFLEET_OP_TIMEOUT_SECS" => {
                    config.op_timeout =
                        Duration::from_secs(parse_var("FREQFLEET_OP_TIMEOUT_SECS", value)?)
                }
                _ => {}
            }
        }
        Ok(config)
    }

    /// Directory composed trading configs are written to
    pub fn configs_dir(&self) -> PathBuf {
        self.user_data_dir.clone()
    }

    /// Directory pairlist files are read from
    pub fn pairlists_dir(&self) -> PathBuf {
        self.user_data_dir.join("pairlists")
    }

    /// Directory of the compose file
    pub fn project_dir(&self) -> PathBuf {
        match self.compose_file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| FleetError::InvalidConfig(format!("{}={} is not valid", key, value)))
}
