//! Container runtime abstraction

use super::config::{ContainerConfig, LifecycleState, RuntimeStatus};
use crate::compose::NetworkSpec;
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// Container engine operations, keyed by container name
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create the network unless it already exists
    async fn ensure_network(&self, network: &NetworkSpec) -> Result<()>;

    /// Provision a container without starting it
    async fn create(&self, config: &ContainerConfig) -> Result<()>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str) -> Result<()>;

    async fn restart(&self, name: &str) -> Result<()>;

    /// Remove a container that is not running
    async fn remove(&self, name: &str) -> Result<()>;

    /// Current state, or `None` when no such container exists
    async fn inspect(&self, name: &str) -> Result<Option<RuntimeStatus>>;

    /// Last `tail` lines of the container's output, oldest first
    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
struct MemoryContainer {
    config: ContainerConfig,
    status: RuntimeStatus,
    output: Vec<String>,
}

/// In-process runtime that keeps containers in a map
///
/// Mirrors the engine's observable behavior closely enough for the
/// lifecycle controller: starting a running container and stopping a stopped
/// one are accepted silently, removing a running container is refused.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    containers: RwLock<HashMap<String, MemoryContainer>>,
    networks: RwLock<BTreeMap<String, String>>,
    latency: RwLock<Duration>,
    unreachable: AtomicBool,
    inspect_calls: AtomicUsize,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut guard) = self.latency.write() {
            *guard = latency;
        }
    }

    /// Make every call fail as if the engine were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of `inspect` calls served so far
    pub fn inspect_calls(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst)
    }

    /// Number of containers
    pub fn container_count(&self) -> usize {
        self.containers.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Networks created so far, with their drivers
    pub fn networks(&self) -> BTreeMap<String, String> {
        self.networks.read().map(|n| n.clone()).unwrap_or_default()
    }

    /// Configuration a container was created with
    pub fn container_config(&self, name: &str) -> Option<ContainerConfig> {
        self.containers
            .read()
            .ok()
            .and_then(|c| c.get(name).map(|c| c.config.clone()))
    }

    /// Force a container into `status`, as if it changed outside our control
    pub fn set_status(&self, name: &str, status: RuntimeStatus) -> Result<()> {
        let mut containers = self.write_containers()?;
        let container = containers.get_mut(name).ok_or_else(|| no_such_container(name))?;
        container.status = status;
        Ok(())
    }

    /// Append lines to a container's output
    pub fn push_logs(&self, name: &str, lines: &[&str]) -> Result<()> {
        let mut containers = self.write_containers()?;
        let container = containers.get_mut(name).ok_or_else(|| no_such_container(name))?;
        container.output.extend(lines.iter().map(|l| l.to_string()));
        Ok(())
    }

    async fn call(&self) -> Result<()> {
        let latency = self.latency.read().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(FleetError::RuntimeUnavailable {
                reason: "connection refused".to_string(),
                last_known: None,
            });
        }
        Ok(())
    }

    fn write_containers(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, MemoryContainer>>> {
        self.containers
            .write()
            .map_err(|_| FleetError::Lock("Failed to acquire write lock".to_string()))
    }

    fn set_state(&self, name: &str, state: LifecycleState) -> Result<()> {
        self.set_status(name, RuntimeStatus::new(state))
    }
}

fn no_such_container(name: &str) -> FleetError {
    FleetError::Runtime(format!("No such container: {}", name))
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn ensure_network(&self, network: &NetworkSpec) -> Result<()> {
        self.call().await?;
        let mut networks = self
            .networks
            .write()
            .map_err(|_| FleetError::Lock("Failed to acquire write lock".to_string()))?;
        networks
            .entry(network.name.clone())
            .or_insert_with(|| network.driver_or_default().to_string());
        Ok(())
    }

    async fn create(&self, config: &ContainerConfig) -> Result<()> {
        self.call().await?;
        let known = self.networks();
        if let Some(missing) = config.networks.iter().find(|n| !known.contains_key(*n)) {
            return Err(FleetError::Runtime(format!("network {} not found", missing)));
        }

        let mut containers = self.write_containers()?;
        if containers.contains_key(&config.name) {
            return Err(FleetError::AlreadyExists(config.name.clone()));
        }
        containers.insert(
            config.name.clone(),
            MemoryContainer {
                config: config.clone(),
                status: RuntimeStatus::new(LifecycleState::Created),
                output: Vec::new(),
            },
        );
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.call().await?;
        self.set_state(name, LifecycleState::Running)
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.call().await?;
        let mut containers = self.write_containers()?;
        let container = containers.get_mut(name).ok_or_else(|| no_such_container(name))?;
        if container.status.state.is_active() {
            container.status = RuntimeStatus::with_reason(LifecycleState::Stopped, "exit code 0");
        }
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.call().await?;
        self.set_state(name, LifecycleState::Running)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.call().await?;
        let mut containers = self.write_containers()?;
        match containers.get(name) {
            None => Err(no_such_container(name)),
            Some(c) if c.status.state.is_active() => Err(FleetError::Runtime(format!(
                "cannot remove running container {}",
                name
            ))),
            Some(_) => {
                containers.remove(name);
                Ok(())
            }
        }
    }

    async fn inspect(&self, name: &str) -> Result<Option<RuntimeStatus>> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        self.call().await?;
        let containers = self
            .containers
            .read()
            .map_err(|_| FleetError::Lock("Failed to acquire read lock".to_string()))?;
        Ok(containers.get(name).map(|c| c.status.clone()))
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>> {
        self.call().await?;
        let containers = self
            .containers
            .read()
            .map_err(|_| FleetError::Lock("Failed to acquire read lock".to_string()))?;
        let output = &containers.get(name).ok_or_else(|| no_such_container(name))?.output;
        Ok(output[output.len().saturating_sub(tail)..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> ContainerConfig {
        ContainerConfig {
            name: name.to_string(),
            service: name.to_string(),
            image: "freqtradeorg/freqtrade:stable".to_string(),
            cmd: Vec::new(),
            env: Vec::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            networks: vec!["freqtrade".to_string()],
            restart: None,
            gpu: None,
        }
    }

    #[tokio::test]
    async fn test_memory_runtime_lifecycle() {
        let runtime = MemoryRuntime::new();
        runtime
            .ensure_network(&NetworkSpec::bridge("freqtrade"))
            .await
            .unwrap();
        runtime.create(&config("bot1")).await.unwrap();
        assert_eq!(
            runtime.inspect("bot1").await.unwrap().unwrap().state,
            LifecycleState::Created
        );

        runtime.start("bot1").await.unwrap();
        assert!(runtime.remove("bot1").await.is_err());

        runtime.stop("bot1").await.unwrap();
        runtime.remove("bot1").await.unwrap();
        assert!(runtime.inspect("bot1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logs_tail() {
        let runtime = MemoryRuntime::new();
        runtime
            .ensure_network(&NetworkSpec::bridge("freqtrade"))
            .await
            .unwrap();
        runtime.create(&config("bot1")).await.unwrap();
        assert!(runtime.logs("bot1", 100).await.unwrap().is_empty());

        runtime.push_logs("bot1", &["a", "b", "c"]).unwrap();
        assert_eq!(runtime.logs("bot1", 100).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(runtime.logs("bot1", 1).await.unwrap(), vec!["c"]);
        assert!(runtime.logs("bot2", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_create_requires_network() {
        let runtime = MemoryRuntime::new();
        assert!(matches!(
            runtime.create(&config("bot1")).await,
            Err(FleetError::Runtime(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable() {
        let runtime = MemoryRuntime::new();
        runtime.set_unreachable(true);
        let err = runtime.inspect("bot1").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(runtime.inspect_calls(), 1);
    }
}
