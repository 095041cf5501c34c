//! Fleet orchestrator
//!
//! Owns the shared compose document of one deployment and wires the
//! allocator, template composer, synchronizer and lifecycle controller
//! together. Every persisted mutation works on a copy of the document, saves
//! it, and only then swaps it in, so a failed save leaves memory untouched.

use super::config::{
    CommandSpec, GpuReservation, NetworkSpec, PortBinding, RestartPolicy, ServiceSpec, VolumeBind,
    VolumeSpec,
};
use super::document::{ComposeDocument, SharedDocument};
use super::parser::ComposeParser;
use super::sync::ComposeSync;
use crate::config::FleetConfig;
use crate::container::{ContainerRuntime, LifecycleController, StatusReport};
use crate::error::{FleetError, Result};
use crate::network::{NetworkGuard, PortAllocator, PortChecker};
use crate::template::{ConfigOverrides, CustomSettings, Pairlist, TemplateComposer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Port the trading bot's API listens on inside its container
pub const BOT_API_PORT: u16 = 8080;

/// Where the user data directory is mounted in a bot container
const CONTAINER_USER_DATA: &str = "/freqtrade/user_data";

/// Request to deploy a new bot
#[derive(Debug, Clone)]
pub struct BotRequest {
    /// Service and container name
    pub name: String,
    pub strategy: String,
    /// Template file name
    pub template: String,
    /// Generate the config from these settings instead of the template
    pub custom: Option<CustomSettings>,
    /// Pairlist file name in the pairlists directory
    pub pairlist: Option<String>,
    /// Preferred host port; the configured base port otherwise
    pub host_port: Option<u16>,
    pub dry_run: Option<bool>,
    /// Start the container after creating it
    pub start: bool,
}

impl BotRequest {
    pub fn new(name: &str, strategy: &str, template: &str) -> Self {
        Self {
            name: name.to_string(),
            strategy: strategy.to_string(),
            template: template.to_string(),
            custom: None,
            pairlist: None,
            host_port: None,
            dry_run: None,
            start: true,
        }
    }
}

/// Outcome of a deployment
#[derive(Debug, Clone)]
pub struct DeployedBot {
    pub service: String,
    pub host_port: u16,
    /// Trading config written for the bot
    pub config_path: PathBuf,
    pub started: bool,
}

/// Fleet orchestrator
pub struct FleetOrchestrator {
    config: FleetConfig,
    document: SharedDocument,
    sync: ComposeSync,
    allocator: Mutex<PortAllocator>,
    composer: TemplateComposer,
    lifecycle: LifecycleController,
}

impl FleetOrchestrator {
    /// Load the compose file, or start from an empty document with the fleet
    /// network when there is none yet
    pub async fn open(
        config: FleetConfig,
        runtime: Arc<dyn ContainerRuntime>,
        checker: Arc<dyn PortChecker>,
    ) -> Result<Self> {
        let sync = ComposeSync::new(&config.compose_file);
        let document = if sync.exists().await {
            sync.load().await?
        } else {
            tracing::info!(
                "No compose file at {}, starting a new one",
                config.compose_file.display()
            );
            ComposeDocument::bootstrap(&config.network)
        };
        let document = document.into_shared();

        let project_dir = absolute(&config.project_dir())?;
        let lifecycle = LifecycleController::new(runtime, document.clone(), project_dir)
            .with_timeout(config.op_timeout)
            .with_status_ttl(config.status_ttl);

        let mut search_dirs = vec![config.configs_dir()];
        if !search_dirs.contains(&config.user_data_dir) {
            search_dirs.push(config.user_data_dir.clone());
        }

        Ok(Self {
            composer: TemplateComposer::new(search_dirs),
            allocator: Mutex::new(PortAllocator::new(checker)),
            lifecycle,
            sync,
            document,
            config,
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Shared document handle
    pub fn shared(&self) -> SharedDocument {
        self.document.clone()
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    /// Snapshot of the document
    pub async fn document(&self) -> ComposeDocument {
        self.document.read().await.clone()
    }

    pub async fn services(&self) -> Vec<ServiceSpec> {
        self.document.read().await.list_services().to_vec()
    }

    pub async fn networks(&self) -> Vec<NetworkSpec> {
        self.document.read().await.networks().to_vec()
    }

    /// Declared networks with the number of services on each
    pub async fn network_usage(&self) -> Vec<(String, usize)> {
        NetworkGuard::reference_counts(&*self.document.read().await)
    }

    /// Compose a config, reserve a port, write the config, commit the bot
    /// service, then create (and optionally start) its container
    ///
    /// A failure before the commit leaves both the document and the configs
    /// directory as they were.
    pub async fn deploy_bot(&self, request: &BotRequest) -> Result<DeployedBot> {
        if self.document.read().await.get_service(&request.name).is_some() {
            return Err(FleetError::DuplicateName(request.name.clone()));
        }

        let pairlist = match &request.pairlist {
            Some(file) => Some(Pairlist::load(&self.config.pairlists_dir().join(file))?),
            None => None,
        };
        let overrides = ConfigOverrides {
            strategy_name: Some(request.strategy.clone()),
            pairlist,
            api_port: Some(BOT_API_PORT),
            identifier: Some(request.name.clone()),
            dry_run: request.dry_run,
        };
        let artifact = match &request.custom {
            Some(settings) => self.composer.compose_custom(settings, &overrides)?,
            None => {
                let template = self.composer.load_template(&request.template)?;
                self.composer.compose(&template, &overrides)?
            }
        };
        let config_file = format!("config_{}.json", request.name);
        let config_path = self.config.configs_dir().join(&config_file);

        let host_port = {
            let mut document = self.document.write().await;
            if document.get_service(&request.name).is_some() {
                return Err(FleetError::DuplicateName(request.name.clone()));
            }
            let preferred = request.host_port.unwrap_or(self.config.base_port);
            let port = self
                .allocator
                .lock()
                .await
                .reserve(&document, preferred, 1)?
                .first()
                .copied()
                .ok_or(FleetError::PortRangeExhausted { preferred, count: 1 })?;

            // The mounted config must exist before the service refers to it
            let committed = match artifact.write(&config_path) {
                Ok(()) => {
                    let spec = self.bot_service(request, port, &config_file);
                    let network = self.config.network.clone();
                    let result = self
                        .commit(&mut document, |doc| {
                            if doc.get_network(&network).is_none() {
                                doc.add_network(NetworkSpec::bridge(&network))?;
                            }
                            doc.add_service(spec)
                        })
                        .await;
                    if result.is_err() {
                        if let Err(e) = std::fs::remove_file(&config_path) {
                            tracing::warn!(
                                "Failed to remove config {}: {}",
                                config_path.display(),
                                e
                            );
                        }
                    }
                    result
                }
                Err(e) => Err(e),
            };
            self.allocator.lock().await.release(&[port]);
            committed?;
            port
        };

        tracing::info!(
            "Deployed bot {} on port {} with strategy {}",
            request.name,
            host_port,
            request.strategy
        );

        self.lifecycle.create(&request.name).await?;
        if request.start {
            self.lifecycle.start(&request.name).await?;
        }

        Ok(DeployedBot {
            service: request.name.clone(),
            host_port,
            config_path,
            started: request.start,
        })
    }

    /// Remove the bot's container, then its service
    ///
    /// Fails with `StillRunning` while the container runs.
    pub async fn remove_bot(&self, name: &str) -> Result<ServiceSpec> {
        if self.document.read().await.get_service(name).is_none() {
            return Err(FleetError::ServiceNotFound(name.to_string()));
        }
        self.lifecycle.remove(name).await?;
        let removed = self.mutate(|doc| doc.remove_service(name)).await?;
        tracing::info!("Removed bot {}", name);
        Ok(removed)
    }

    pub async fn add_service(&self, spec: ServiceSpec) -> Result<()> {
        self.mutate(|doc| doc.add_service(spec)).await
    }

    pub async fn update_service(&self, spec: ServiceSpec) -> Result<()> {
        self.mutate(|doc| doc.update_service(spec)).await
    }

    pub async fn remove_service(&self, name: &str) -> Result<ServiceSpec> {
        self.mutate(|doc| doc.remove_service(name)).await
    }

    pub async fn add_network(&self, spec: NetworkSpec) -> Result<()> {
        self.mutate(|doc| doc.add_network(spec)).await
    }

    pub async fn remove_network(&self, name: &str) -> Result<NetworkSpec> {
        self.mutate(|doc| doc.remove_network(name)).await
    }

    pub async fn add_volume(&self, spec: VolumeSpec) -> Result<()> {
        self.mutate(|doc| doc.add_volume(spec)).await
    }

    pub async fn remove_volume(&self, name: &str) -> Result<VolumeSpec> {
        self.mutate(|doc| doc.remove_volume(name)).await
    }

    /// Compose file as text, as it would be saved when nothing is on disk yet
    pub async fn raw_yaml(&self) -> Result<String> {
        if self.sync.exists().await {
            self.sync.read_raw().await
        } else {
            ComposeParser::to_yaml(&*self.document.read().await)
        }
    }

    /// Replace the compose file with hand-edited content
    ///
    /// The content is validated first and written verbatim; the in-memory
    /// document is replaced only once the write succeeded.
    pub async fn apply_raw_yaml(&self, content: &str) -> Result<()> {
        let mut document = self.document.write().await;
        let (parsed, backup) = self.sync.save_raw(content).await?;
        *document = parsed;
        if let Some(backup) = backup {
            tracing::debug!("Previous compose file kept at {}", backup.display());
        }
        self.allocator.lock().await.rescan();
        Ok(())
    }

    /// Check content without saving it, returning warnings
    pub fn validate_yaml(&self, content: &str) -> Result<Vec<String>> {
        ComposeParser::parse_str(content)?;
        ComposeParser::lint(content)
    }

    /// Create the container when it does not exist yet, then start it
    pub async fn start_service(&self, name: &str) -> Result<()> {
        match self.lifecycle.create(name).await {
            Ok(()) | Err(FleetError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
        self.lifecycle.start(name).await
    }

    pub async fn stop_service(&self, name: &str) -> Result<()> {
        self.lifecycle.stop(name).await
    }

    pub async fn restart_service(&self, name: &str) -> Result<()> {
        self.lifecycle.restart(name).await
    }

    pub async fn status(&self, name: &str) -> Result<StatusReport> {
        self.lifecycle.status(name).await
    }

    /// Last `tail` lines of a service's output
    pub async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>> {
        self.lifecycle.logs(name, tail).await
    }

    /// Status of every service, in document order
    pub async fn status_all(&self) -> Vec<(String, Result<StatusReport>)> {
        let mut out = Vec::new();
        for name in self.service_names().await {
            let status = self.lifecycle.status(&name).await;
            out.push((name, status));
        }
        out
    }

    /// Start every service; failures are reported per service
    pub async fn start_all(&self) -> Vec<(String, Result<()>)> {
        let mut out = Vec::new();
        for name in self.service_names().await {
            let result = self.start_service(&name).await;
            if let Err(e) = &result {
                tracing::warn!("Failed to start {}: {}", name, e);
            }
            out.push((name, result));
        }
        out
    }

    /// Stop every service, in reverse document order
    pub async fn stop_all(&self) -> Vec<(String, Result<()>)> {
        let mut out = Vec::new();
        for name in self.service_names().await.into_iter().rev() {
            let result = self.lifecycle.stop(&name).await;
            if let Err(e) = &result {
                tracing::warn!("Failed to stop {}: {}", name, e);
            }
            out.push((name, result));
        }
        out
    }

    async fn service_names(&self) -> Vec<String> {
        self.document
            .read()
            .await
            .list_services()
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    /// Apply `change` under the write lock and persist it
    async fn mutate<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut ComposeDocument) -> Result<T>,
    {
        let mut document = self.document.write().await;
        self.commit(&mut document, change).await
    }

    async fn commit<T, F>(&self, document: &mut ComposeDocument, change: F) -> Result<T>
    where
        F: FnOnce(&mut ComposeDocument) -> Result<T>,
    {
        let mut next = document.clone();
        let out = change(&mut next)?;
        self.sync.save(&next).await?;
        *document = next;
        Ok(out)
    }

    fn bot_service(&self, request: &BotRequest, host_port: u16, config_file: &str) -> ServiceSpec {
        let config_path = format!("{}/{}", CONTAINER_USER_DATA, config_file);
        let strategies = format!("{}/strategies", CONTAINER_USER_DATA);
        let command = [
            "trade",
            "--config",
            config_path.as_str(),
            "--strategy-path",
            strategies.as_str(),
            "--strategy",
            request.strategy.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mut spec = ServiceSpec::new(&request.name, &self.config.image)
            .restart(RestartPolicy::UnlessStopped)
            .volume(VolumeBind::new(&bind_source(&self.config.user_data_dir), CONTAINER_USER_DATA))
            .command(CommandSpec::Exec(command))
            .env("FREQTRADE_CONFIG_FILE", &config_path)
            .env("FREQTRADE_STRATEGY", &request.strategy)
            .port(PortBinding::new(host_port, BOT_API_PORT))
            .network(&self.config.network);
        spec.container_name = Some(request.name.clone());
        if let Some(pairlist) = &request.pairlist {
            spec = spec.env("FREQTRADE_PAIRLIST", pairlist);
        }
        if let Some(driver) = &self.config.gpu_driver {
            spec = spec.gpu(GpuReservation::new(driver));
        }
        spec
    }
}

/// Compose-style bind source for a host directory
fn bind_source(dir: &Path) -> String {
    if dir.is_absolute() {
        dir.to_string_lossy().into_owned()
    } else {
        format!("./{}", dir.to_string_lossy().trim_start_matches("./"))
    }
}

fn absolute(dir: &Path) -> Result<PathBuf> {
    if dir.is_absolute() {
        Ok(dir.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{LifecycleState, MemoryRuntime};
    use crate::network::StaticPortChecker;

    const TEMPLATE: &str = r#"{
        "max_open_trades": 3,
        "stake_currency": "USDT",
        "timeframe": "5m",
        "dry_run": true,
        "exchange": {"name": "binance", "pair_whitelist": []},
        "pairlists": [{"method": "StaticPairList"}]
    }"#;

    struct Fixture {
        _temp: tempfile::TempDir,
        runtime: Arc<MemoryRuntime>,
        orchestrator: FleetOrchestrator,
    }

    async fn fixture_with(bound: &[u16]) -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let user_data = temp.path().join("user_data");
        std::fs::create_dir_all(user_data.join("pairlists")).unwrap();
        std::fs::write(user_data.join("base.json"), TEMPLATE).unwrap();
        std::fs::write(
            user_data.join("pairlists").join("majors.json"),
            r#"{"pair_whitelist": ["BTC/USDT", "ETH/USDT"]}"#,
        )
        .unwrap();

        let config = FleetConfig {
            compose_file: temp.path().join("docker-compose.yml"),
            user_data_dir: user_data,
            ..FleetConfig::default()
        };
        let runtime = Arc::new(MemoryRuntime::new());
        let orchestrator = FleetOrchestrator::open(
            config,
            runtime.clone(),
            Arc::new(StaticPortChecker::tcp(bound)),
        )
        .await
        .unwrap();
        Fixture {
            _temp: temp,
            runtime,
            orchestrator,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(&[]).await
    }

    fn request(name: &str) -> BotRequest {
        let mut request = BotRequest::new(name, "SampleStrategy", "base.json");
        request.pairlist = Some("majors.json".to_string());
        request
    }

    #[tokio::test]
    async fn test_deploy_bot() {
        let f = fixture().await;
        let deployed = f.orchestrator.deploy_bot(&request("bot1")).await.unwrap();
        assert_eq!(deployed.host_port, 8080);
        assert!(deployed.started);

        let config: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&deployed.config_path).unwrap()).unwrap();
        assert_eq!(config["strategy"], "SampleStrategy");
        assert_eq!(config["bot_name"], "bot1");
        assert_eq!(config["exchange"]["pair_whitelist"][0], "BTC/USDT");

        let reloaded = ComposeSync::new(&f.orchestrator.config().compose_file)
            .load()
            .await
            .unwrap();
        let spec = reloaded.get_service("bot1").unwrap();
        assert_eq!(spec.restart, Some(RestartPolicy::UnlessStopped));
        assert_eq!(spec.container_name.as_deref(), Some("bot1"));
        assert!(reloaded.get_network("freqtrade_network").is_some());

        let status = f.orchestrator.status("bot1").await.unwrap();
        assert_eq!(status.state(), LifecycleState::Running);
        let container = f.runtime.container_config("bot1").unwrap();
        assert!(container.cmd.contains(&"/freqtrade/user_data/config_bot1.json".to_string()));
    }

    #[tokio::test]
    async fn test_ports_are_allocated_upward() {
        let f = fixture_with(&[8081]).await;
        f.orchestrator.deploy_bot(&request("bot1")).await.unwrap();
        let second = f.orchestrator.deploy_bot(&request("bot2")).await.unwrap();
        assert_eq!(second.host_port, 8082);
    }

    #[tokio::test]
    async fn test_deploy_duplicate_name() {
        let f = fixture().await;
        f.orchestrator.deploy_bot(&request("bot1")).await.unwrap();
        assert!(matches!(
            f.orchestrator.deploy_bot(&request("bot1")).await,
            Err(FleetError::DuplicateName(_))
        ));
        assert_eq!(f.orchestrator.services().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_config_aborts_deploy() {
        let f = fixture().await;
        let o = &f.orchestrator;
        o.deploy_bot(&request("bot0")).await.unwrap();
        std::fs::create_dir_all(o.config().configs_dir().join("config_bot1.json")).unwrap();

        assert!(matches!(
            o.deploy_bot(&request("bot1")).await,
            Err(FleetError::Persistence { .. })
        ));
        assert!(o.document().await.get_service("bot1").is_none());
        let reloaded = ComposeSync::new(&o.config().compose_file).load().await.unwrap();
        assert!(reloaded.get_service("bot1").is_none());
        assert_eq!(f.runtime.container_count(), 1);

        // the port was not leaked to the failed attempt
        let next = o.deploy_bot(&request("bot2")).await.unwrap();
        assert_eq!(next.host_port, 8081);
    }

    #[tokio::test]
    async fn test_rejected_commit_removes_config() {
        let f = fixture().await;
        let o = &f.orchestrator;
        let mut squatter = ServiceSpec::new("web", "nginx:alpine").network("freqtrade_network");
        squatter.container_name = Some("bot1".into());
        o.add_service(squatter).await.unwrap();

        assert!(matches!(
            o.deploy_bot(&request("bot1")).await,
            Err(FleetError::DuplicateName(_))
        ));
        assert!(!o.config().configs_dir().join("config_bot1.json").exists());
        assert_eq!(o.services().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_deploys_get_distinct_ports() {
        let f = fixture().await;
        let o = &f.orchestrator;
        let (r1, r2, r3, r4) = (request("bot1"), request("bot2"), request("bot3"), request("bot4"));
        let (a, b, c, d) = tokio::join!(
            o.deploy_bot(&r1),
            o.deploy_bot(&r2),
            o.deploy_bot(&r3),
            o.deploy_bot(&r4),
        );

        let mut ports: Vec<u16> = [a, b, c, d]
            .into_iter()
            .map(|r| r.unwrap().host_port)
            .collect();
        ports.sort();
        assert_eq!(ports, vec![8080, 8081, 8082, 8083]);

        let reloaded = ComposeSync::new(&o.config().compose_file).load().await.unwrap();
        assert_eq!(reloaded, o.document().await);
        assert_eq!(reloaded.bound_ports().len(), 4);
        assert_eq!(f.runtime.container_count(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_add_service_conflicts() {
        let f = fixture().await;
        let o = Arc::new(f.orchestrator);
        let mut handles = Vec::new();
        for i in 0..8u16 {
            let o = o.clone();
            handles.push(tokio::spawn(async move {
                let spec = ServiceSpec::new(&format!("svc{}", i), "nginx:alpine")
                    .port(PortBinding::new(9000 + i % 4, 80));
                o.add_service(spec).await
            }));
        }

        let mut added = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => added += 1,
                Err(FleetError::PortConflict { .. }) => {}
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }
        assert_eq!(added, 4);

        let reloaded = ComposeSync::new(&o.config().compose_file).load().await.unwrap();
        assert_eq!(reloaded.list_services().len(), 4);
        reloaded.validate().unwrap();
    }

    #[tokio::test]
    async fn test_deploy_from_custom_settings() {
        let f = fixture().await;
        let mut request = request("bot1");
        request.template = "missing.json".to_string();
        request.custom = Some(CustomSettings {
            timeframe: "1h".to_string(),
            ..CustomSettings::default()
        });

        let deployed = f.orchestrator.deploy_bot(&request).await.unwrap();
        let config: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&deployed.config_path).unwrap()).unwrap();
        assert_eq!(config["timeframe"], "1h");
        assert_eq!(config["exchange"]["pair_whitelist"][1], "ETH/USDT");
        assert_eq!(config["strategy"], "SampleStrategy");

        f.runtime.push_logs("bot1", &["heartbeat", "entry BTC/USDT"]).unwrap();
        assert_eq!(
            f.orchestrator.logs("bot1", 1).await.unwrap(),
            vec!["entry BTC/USDT"]
        );
    }

    #[tokio::test]
    async fn test_deploy_with_missing_template() {
        let f = fixture().await;
        let request = BotRequest::new("bot1", "SampleStrategy", "missing.json");
        assert!(matches!(
            f.orchestrator.deploy_bot(&request).await,
            Err(FleetError::InvalidTemplate(_))
        ));
        assert!(f.orchestrator.services().await.is_empty());
    }

    #[tokio::test]
    async fn test_network_scenario() {
        let f = fixture().await;
        let o = &f.orchestrator;
        o.add_network(NetworkSpec::bridge("net1")).await.unwrap();
        o.add_service(
            ServiceSpec::new("bot1", "freqtradeorg/freqtrade:stable")
                .port(PortBinding::new(8080, 8080))
                .network("net1"),
        )
        .await
        .unwrap();

        let before = o.raw_yaml().await.unwrap();
        match o.remove_network("net1").await {
            Err(FleetError::NetworkInUse { services, .. }) => assert_eq!(services, vec!["bot1"]),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(o.raw_yaml().await.unwrap(), before);

        o.remove_service("bot1").await.unwrap();
        o.remove_network("net1").await.unwrap();
        assert!(o.document().await.get_network("net1").is_none());
    }

    #[tokio::test]
    async fn test_remove_bot_requires_stop() {
        let f = fixture().await;
        f.orchestrator.deploy_bot(&request("bot1")).await.unwrap();

        assert!(matches!(
            f.orchestrator.remove_bot("bot1").await,
            Err(FleetError::StillRunning(_))
        ));
        assert!(f.orchestrator.document().await.get_service("bot1").is_some());

        f.orchestrator.stop_service("bot1").await.unwrap();
        f.orchestrator.remove_bot("bot1").await.unwrap();
        assert!(f.orchestrator.services().await.is_empty());
        assert_eq!(f.runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_raw_yaml() {
        let f = fixture().await;
        let o = &f.orchestrator;
        o.deploy_bot(&request("bot1")).await.unwrap();
        let before = o.document().await;

        let invalid = "services:\n  bot2:\n    image: x\n    networks: [nowhere]\n";
        assert!(matches!(
            o.apply_raw_yaml(invalid).await,
            Err(FleetError::DocumentInvalid(_))
        ));
        assert_eq!(o.document().await, before);

        let raw = o.raw_yaml().await.unwrap().replace("8080:8080", "9090:8080");
        o.apply_raw_yaml(&raw).await.unwrap();
        assert_eq!(o.raw_yaml().await.unwrap(), raw);
        assert_eq!(
            o.document().await.port_owner(9090, crate::compose::Protocol::Tcp),
            Some("bot1")
        );
    }

    #[tokio::test]
    async fn test_validate_yaml_warnings() {
        let f = fixture().await;
        let warnings = f
            .orchestrator
            .validate_yaml("version: '3.8'\nservices:\n  bot1:\n    image: x\n")
            .unwrap();
        assert!(!warnings.is_empty());
        assert!(f.orchestrator.validate_yaml("services: [").is_err());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_memory_unchanged() {
        let temp = tempfile::tempdir().unwrap();
        let config = FleetConfig {
            compose_file: temp.path().join("missing").join("docker-compose.yml"),
            user_data_dir: temp.path().join("user_data"),
            ..FleetConfig::default()
        };
        let o = FleetOrchestrator::open(
            config,
            Arc::new(MemoryRuntime::new()),
            Arc::new(StaticPortChecker::default()),
        )
        .await
        .unwrap();

        let before = o.document().await;
        assert!(matches!(
            o.add_network(NetworkSpec::bridge("net1")).await,
            Err(FleetError::Persistence { .. })
        ));
        assert_eq!(o.document().await, before);
    }

    #[tokio::test]
    async fn test_start_service_creates_when_absent() {
        let f = fixture().await;
        let o = &f.orchestrator;
        o.add_service(
            ServiceSpec::new("web", "nginx:alpine")
                .port(PortBinding::new(8000, 80))
                .network("freqtrade_network"),
        )
        .await
        .unwrap();

        o.start_service("web").await.unwrap();
        o.start_service("web").await.unwrap();
        assert_eq!(f.runtime.container_count(), 1);

        let stopped = o.stop_all().await;
        assert!(stopped.iter().all(|(_, r)| r.is_ok()));
        let statuses = o.status_all().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(
            statuses[0].1.as_ref().unwrap().state(),
            LifecycleState::Stopped
        );
    }

    #[tokio::test]
    async fn test_reopen_keeps_document() {
        let f = fixture().await;
        f.orchestrator.deploy_bot(&request("bot1")).await.unwrap();
        let config = f.orchestrator.config().clone();

        let reopened = FleetOrchestrator::open(
            config,
            Arc::new(MemoryRuntime::new()),
            Arc::new(StaticPortChecker::default()),
        )
        .await
        .unwrap();
        assert_eq!(reopened.document().await, f.orchestrator.document().await);
        assert_eq!(reopened.network_usage().await, vec![("freqtrade_network".to_string(), 1)]);
    }
}
