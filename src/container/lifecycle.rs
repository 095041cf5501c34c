//! Container lifecycle management
//!
//! The controller turns compose services into containers and keeps the two
//! in step. It never retries: a runtime call that exceeds the timeout marks
//! the service as faulted and every further lifecycle call for it fails with
//! [`FleetError::StatusCheckRequired`] until a `status` query succeeds.

use super::config::{ContainerConfig, LifecycleState, RuntimeStatus, StatusReport};
use super::runtime::ContainerRuntime;
use crate::compose::{NetworkSpec, SharedDocument};
use crate::error::{FleetError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

/// Default timeout for a single runtime call
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default age after which a cached status is queried again
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct CacheEntry {
    report: StatusReport,
    /// `None` once invalidated
    fetched: Option<Instant>,
}

/// Recently observed statuses
#[derive(Debug)]
pub struct StatusCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached report younger than the TTL
    pub fn get_fresh(&self, service: &str) -> Result<Option<StatusReport>> {
        Ok(self
            .entries()?
            .get(service)
            .filter(|e| e.fetched.is_some_and(|t| t.elapsed() < self.ttl))
            .map(|e| e.report.clone()))
    }

    /// Last report regardless of age, flagged stale
    pub fn last_known(&self, service: &str) -> Result<Option<StatusReport>> {
        Ok(self.entries()?.get(service).map(|e| StatusReport {
            stale: true,
            ..e.report.clone()
        }))
    }

    pub fn insert(&self, report: StatusReport) -> Result<()> {
        self.entries()?.insert(
            report.service.clone(),
            CacheEntry {
                report,
                fetched: Some(Instant::now()),
            },
        );
        Ok(())
    }

    /// Keep `report` as the last known state without making it fresh
    pub fn record(&self, report: StatusReport) -> Result<()> {
        self.entries()?.insert(
            report.service.clone(),
            CacheEntry {
                report,
                fetched: None,
            },
        );
        Ok(())
    }

    /// Force the next query to go to the runtime
    pub fn invalidate(&self, service: &str) -> Result<()> {
        if let Some(entry) = self.entries()?.get_mut(service) {
            entry.fetched = None;
        }
        Ok(())
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| FleetError::Lock("Failed to acquire status cache lock".to_string()))
    }
}

/// Lifecycle controller
pub struct LifecycleController {
    runtime: Arc<dyn ContainerRuntime>,
    document: SharedDocument,
    /// Relative bind sources resolve against this directory
    project_dir: PathBuf,
    timeout: Duration,
    cache: StatusCache,
    /// Services whose last call timed out, with the reason
    faults: Mutex<HashMap<String, String>>,
    /// One live status query per service at a time
    refreshing: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LifecycleController {
    /// Create a controller with default timeout and cache TTL
    pub fn new(runtime: Arc<dyn ContainerRuntime>, document: SharedDocument, project_dir: PathBuf) -> Self {
        Self {
            runtime,
            document,
            project_dir,
            timeout: DEFAULT_OP_TIMEOUT,
            cache: StatusCache::new(DEFAULT_STATUS_TTL),
            faults: Mutex::new(HashMap::new()),
            refreshing: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_status_ttl(mut self, ttl: Duration) -> Self {
        self.cache = StatusCache::new(ttl);
        self
    }

    /// Reason the service is faulted, if it is
    pub fn fault(&self, service: &str) -> Result<Option<String>> {
        Ok(self.faults()?.get(service).cloned())
    }

    /// Create the service's container and the networks it joins
    pub async fn create(&self, service: &str) -> Result<()> {
        self.check_fault(service)?;
        let (config, networks) = {
            let document = self.document.read().await;
            let spec = document
                .get_service(service)
                .ok_or_else(|| FleetError::ServiceNotFound(service.to_string()))?;
            let networks: Vec<NetworkSpec> = spec
                .network_names()
                .filter_map(|n| document.get_network(n).cloned())
                .collect();
            (ContainerConfig::from_service(spec, &self.project_dir), networks)
        };

        self.guarded("create", service, &config.name, async {
            if let Some(status) = self.runtime.inspect(&config.name).await? {
                if status.state != LifecycleState::Removed {
                    return Err(FleetError::AlreadyExists(config.name.clone()));
                }
            }
            for network in networks.iter().filter(|n| n.flags.external != Some(true)) {
                self.runtime.ensure_network(network).await?;
            }
            self.runtime.create(&config).await
        })
        .await?;

        self.cache.invalidate(service)?;
        tracing::info!("Created container {} for service {}", config.name, service);
        Ok(())
    }

    /// Start the service's container; a running container is left alone
    pub async fn start(&self, service: &str) -> Result<()> {
        self.check_fault(service)?;
        let container = self.container_name(service).await?;

        let started = self
            .guarded("start", service, &container, async {
                match self.runtime.inspect(&container).await? {
                    None => Err(FleetError::ServiceNotFound(format!(
                        "{} (no container; create it first)",
                        service
                    ))),
                    Some(status) if status.state.is_active() => Ok(false),
                    Some(_) => self.runtime.start(&container).await.map(|_| true),
                }
            })
            .await?;

        self.cache.invalidate(service)?;
        if started {
            tracing::info!("Started {}", service);
        } else {
            tracing::debug!("{} is already running", service);
        }
        Ok(())
    }

    /// Stop the service's container; stopped or missing containers are left alone
    pub async fn stop(&self, service: &str) -> Result<()> {
        self.check_fault(service)?;
        let container = self.container_name(service).await?;

        let stopped = self
            .guarded("stop", service, &container, async {
                match self.runtime.inspect(&container).await? {
                    Some(status) if status.state.is_active() => {
                        self.runtime.stop(&container).await.map(|_| true)
                    }
                    _ => Ok(false),
                }
            })
            .await?;

        self.cache.invalidate(service)?;
        if stopped {
            tracing::info!("Stopped {}", service);
        } else {
            tracing::debug!("{} is not running", service);
        }
        Ok(())
    }

    pub async fn restart(&self, service: &str) -> Result<()> {
        self.check_fault(service)?;
        let container = self.container_name(service).await?;

        self.guarded("restart", service, &container, async {
            if self.runtime.inspect(&container).await?.is_none() {
                return Err(FleetError::ServiceNotFound(format!(
                    "{} (no container; create it first)",
                    service
                )));
            }
            self.runtime.restart(&container).await
        })
        .await?;

        self.cache.invalidate(service)?;
        tracing::info!("Restarted {}", service);
        Ok(())
    }

    /// Remove the service's container
    ///
    /// Refused while the container is running; there is no implicit stop.
    /// The service does not have to be in the document any more.
    pub async fn remove(&self, service: &str) -> Result<()> {
        self.check_fault(service)?;
        let container = self.resolve_container(service).await;

        let removed = self
            .guarded("remove", service, &container, async {
                match self.runtime.inspect(&container).await? {
                    None => Ok(false),
                    Some(status) if status.state.is_active() => {
                        Err(FleetError::StillRunning(service.to_string()))
                    }
                    Some(_) => self.runtime.remove(&container).await.map(|_| true),
                }
            })
            .await?;

        self.cache.invalidate(service)?;
        if removed {
            tracing::info!("Removed container {}", container);
        }
        Ok(())
    }

    /// Last `tail` lines of the service's container output
    pub async fn logs(&self, service: &str, tail: usize) -> Result<Vec<String>> {
        let container = self.resolve_container(service).await;
        match tokio::time::timeout(self.timeout, self.runtime.logs(&container, tail)).await {
            Ok(result) => result,
            Err(_) => Err(FleetError::Timeout {
                operation: "logs".to_string(),
                service: service.to_string(),
                after: self.timeout,
            }),
        }
    }

    /// Current status of the service
    ///
    /// Served from the cache while the last observation is fresh. When the
    /// runtime cannot be reached the error carries the last known report.
    /// Concurrent callers for the same service share one live query.
    pub async fn status(&self, service: &str) -> Result<StatusReport> {
        if let Some(report) = self.cache.get_fresh(service)? {
            return Ok(report);
        }

        let refresh = self.refresh_lock(service)?;
        let _refreshing = refresh.lock().await;
        if let Some(report) = self.cache.get_fresh(service)? {
            return Ok(report);
        }

        let container = self.resolve_container(service).await;
        let live = match tokio::time::timeout(self.timeout, self.runtime.inspect(&container)).await {
            Ok(result) => result,
            Err(_) => Err(FleetError::Timeout {
                operation: "status".to_string(),
                service: service.to_string(),
                after: self.timeout,
            }),
        };

        match live {
            Ok(status) => {
                let status = status.unwrap_or_else(|| RuntimeStatus::new(LifecycleState::Absent));
                let report = StatusReport::new(service, &container, status);
                self.cache.insert(report.clone())?;
                self.clear_fault(service)?;
                Ok(report)
            }
            Err(e) => {
                tracing::warn!("Status query for {} failed: {}", service, e);
                Err(FleetError::RuntimeUnavailable {
                    reason: e.to_string(),
                    last_known: self.cache.last_known(service)?.map(Box::new),
                })
            }
        }
    }

    /// Run a runtime call under the timeout
    ///
    /// When it expires the service is faulted and its last known state
    /// becomes `error` with the timeout as the reason.
    async fn guarded<T, F>(&self, operation: &str, service: &str, container: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                let reason = format!("{} timed out after {:?}", operation, self.timeout);
                tracing::warn!("{}: {}", service, reason);
                self.cache.record(StatusReport::new(
                    service,
                    container,
                    RuntimeStatus::with_reason(LifecycleState::Error, &reason),
                ))?;
                self.faults()?.insert(service.to_string(), reason);
                Err(FleetError::Timeout {
                    operation: operation.to_string(),
                    service: service.to_string(),
                    after: self.timeout,
                })
            }
        }
    }

    fn faults(&self) -> Result<MutexGuard<'_, HashMap<String, String>>> {
        self.faults
            .lock()
            .map_err(|_| FleetError::Lock("Failed to acquire fault lock".to_string()))
    }

    fn check_fault(&self, service: &str) -> Result<()> {
        match self.faults()?.get(service) {
            Some(reason) => Err(FleetError::StatusCheckRequired {
                service: service.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn clear_fault(&self, service: &str) -> Result<()> {
        if self.faults()?.remove(service).is_some() {
            tracing::info!("Cleared fault on {}", service);
        }
        Ok(())
    }

    fn refresh_lock(&self, service: &str) -> Result<Arc<AsyncMutex<()>>> {
        let mut refreshing = self
            .refreshing
            .lock()
            .map_err(|_| FleetError::Lock("Failed to acquire refresh lock".to_string()))?;
        Ok(refreshing.entry(service.to_string()).or_default().clone())
    }

    /// Container name of a service that must be in the document
    async fn container_name(&self, service: &str) -> Result<String> {
        let document = self.document.read().await;
        document
            .get_service(service)
            .map(|s| s.container_name().to_string())
            .ok_or_else(|| FleetError::ServiceNotFound(service.to_string()))
    }

    /// Container name, falling back to the service name once the service is gone
    async fn resolve_container(&self, service: &str) -> String {
        self.container_name(service)
            .await
            .unwrap_or_else(|_| service.to_string())
    }
}
