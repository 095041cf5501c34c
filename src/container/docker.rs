//! Docker Engine API client
//!
//! Talks to the engine over its unix socket (`unix:///var/run/docker.sock`,
//! the default) or over TCP (`DOCKER_HOST=tcp://host:2375` or an
//! `http(s)://` URL).

use super::config::{ContainerConfig, LifecycleState, RuntimeStatus};
use super::runtime::ContainerRuntime;
use super::socket::SocketClient;
use crate::compose::{NetworkSpec, RestartPolicy};
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Engine address used when `DOCKER_HOST` is not set
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Docker Engine API version requested in every path
const API_VERSION: &str = "v1.43";

/// How requests reach the engine
enum Transport {
    Tcp {
        base_url: String,
        client: reqwest::Client,
    },
    Unix(SocketClient),
}

/// Container runtime backed by the Docker Engine HTTP API
pub struct DockerApiRuntime {
    transport: Transport,
}

/// Status and body of an engine response
#[derive(Debug)]
struct EngineResponse {
    status: StatusCode,
    body: Vec<u8>,
}

impl EngineResponse {
    fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| FleetError::Runtime(format!("unexpected engine response: {}", e)))
    }

    /// Error message the engine put in the body, if any
    fn message(&self) -> String {
        self.json::<ErrorResponse>()
            .map(|e| e.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&self.body).trim().to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    state: ContainerState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    status: String,
    #[serde(default)]
    exit_code: i64,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

/// One line of the image pull progress stream
#[derive(Debug, Deserialize)]
struct PullEvent {
    #[serde(default)]
    error: Option<String>,
}

impl DockerApiRuntime {
    /// Connect to the engine at `host`
    pub fn new(host: &str, timeout: Duration) -> Result<Self> {
        let host = host.trim_end_matches('/');
        let transport = if let Some(path) = host.strip_prefix("unix://") {
            Transport::Unix(SocketClient::new(path))
        } else {
            let client = reqwest::Client::builder()
                .connect_timeout(timeout)
                .build()
                .map_err(|e| FleetError::Runtime(e.to_string()))?;
            Transport::Tcp {
                base_url: Self::base_url(host)?,
                client,
            }
        };
        tracing::debug!("Using Docker Engine API at {}", host);
        Ok(Self { transport })
    }

    fn base_url(host: &str) -> Result<String> {
        let host = host.trim_end_matches('/');
        if let Some(rest) = host.strip_prefix("tcp://") {
            Ok(format!("http://{}", rest))
        } else if host.starts_with("http://") || host.starts_with("https://") {
            Ok(host.to_string())
        } else {
            Err(FleetError::InvalidConfig(format!(
                "unsupported DOCKER_HOST {}",
                host
            )))
        }
    }

    /// Versioned path with its encoded query string
    fn target(path: &str, query: &[(&str, &str)]) -> Result<String> {
        let url = Url::parse_with_params(&format!("http://docker/{}{}", API_VERSION, path), query)
            .map_err(|e| FleetError::Runtime(format!("invalid engine path {}: {}", path, e)))?;
        Ok(match url.query() {
            Some(q) if !q.is_empty() => format!("{}?{}", url.path(), q),
            _ => url.path().to_string(),
        })
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<EngineResponse> {
        let target = Self::target(path, query)?;
        match &self.transport {
            Transport::Tcp { base_url, client } => {
                let mut request = client.request(method, format!("{}{}", base_url, target));
                if let Some(body) = body {
                    request = request.json(body);
                }
                let response = request.send().await.map_err(transport_error)?;
                let status = response.status();
                let body = response.bytes().await.map_err(transport_error)?;
                Ok(EngineResponse {
                    status,
                    body: body.to_vec(),
                })
            }
            Transport::Unix(socket) => {
                let body = body.map(serde_json::to_vec).transpose()?;
                let response = socket
                    .request(method.as_str(), &target, body.as_deref())
                    .await?;
                let status = StatusCode::from_u16(response.status).map_err(|_| {
                    FleetError::Runtime(format!("invalid status {}", response.status))
                })?;
                Ok(EngineResponse {
                    status,
                    body: response.body,
                })
            }
        }
    }

    /// Turn a non-success response into an error carrying the engine's message
    fn check(response: EngineResponse, what: &str) -> Result<EngineResponse> {
        let status = response.status;
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(response);
        }
        let message = response.message();
        Err(match status {
            StatusCode::CONFLICT if what == "create" => FleetError::AlreadyExists(message),
            _ => FleetError::Runtime(format!("{} failed ({}): {}", what, status, message)),
        })
    }

    async fn create_container(&self, config: &ContainerConfig, body: &Value) -> Result<EngineResponse> {
        self.call(
            Method::POST,
            "/containers/create",
            &[("name", config.name.as_str())],
            Some(body),
        )
        .await
    }

    /// Pull `image`, failing when the progress stream reports an error
    async fn pull(&self, image: &str) -> Result<()> {
        tracing::info!("Pulling image {}", image);
        let (repository, tag) = split_image(image);
        let mut query = vec![("fromImage", repository)];
        if let Some(tag) = tag {
            query.push(("tag", tag));
        }
        let response = self.call(Method::POST, "/images/create", &query, None).await?;
        let response = Self::check(response, "pull")?;

        for line in response.body.split(|b| *b == b'\n') {
            if let Ok(PullEvent { error: Some(error) }) = serde_json::from_slice(line) {
                return Err(FleetError::Runtime(format!("pull {} failed: {}", image, error)));
            }
        }
        Ok(())
    }

    fn create_body(config: &ContainerConfig) -> Value {
        let mut exposed = Map::new();
        let mut bindings: Map<String, Value> = Map::new();
        for port in &config.ports {
            let key = format!("{}/{}", port.container_port, port.protocol);
            exposed.insert(key.clone(), json!({}));
            if let Some(host_port) = port.host_port {
                let binding = json!({
                    "HostIp": port.host_ip.clone().unwrap_or_default(),
                    "HostPort": host_port.to_string(),
                });
                match bindings.get_mut(&key) {
                    Some(Value::Array(list)) => list.push(binding),
                    _ => {
                        bindings.insert(key, Value::Array(vec![binding]));
                    }
                }
            }
        }

        let binds: Vec<String> = config.volumes.iter().filter_map(|v| v.to_bind()).collect();
        let anonymous: Map<String, Value> = config
            .volumes
            .iter()
            .filter(|v| v.source.is_none())
            .map(|v| (v.target.clone(), json!({})))
            .collect();

        let mut host_config = json!({
            "Binds": binds,
            "PortBindings": bindings,
        });
        if let Some(policy) = &config.restart {
            let (name, retries) = match policy {
                RestartPolicy::OnFailure(n) => ("on-failure", n.unwrap_or(0)),
                RestartPolicy::No => ("no", 0),
                RestartPolicy::Always => ("always", 0),
                RestartPolicy::UnlessStopped => ("unless-stopped", 0),
            };
            host_config["RestartPolicy"] = json!({ "Name": name, "MaximumRetryCount": retries });
        }
        if let Some(gpu) = &config.gpu {
            host_config["DeviceRequests"] = json!([{
                "Driver": gpu.driver,
                "Count": gpu.count.unwrap_or(-1),
                "Capabilities": [["gpu"]],
            }]);
        }

        let mut body = json!({
            "Image": config.image,
            "Env": config.env,
            "ExposedPorts": exposed,
            "Volumes": anonymous,
            "Labels": { "com.docker.compose.service": config.service },
        });
        if !config.cmd.is_empty() {
            body["Cmd"] = json!(config.cmd);
        }
        // The first network is attached at create time, the rest afterwards
        if let Some(first) = config.networks.first() {
            host_config["NetworkMode"] = json!(first);
            body["NetworkingConfig"] = json!({
                "EndpointsConfig": { first: { "Aliases": [config.service] } }
            });
        }
        body["HostConfig"] = host_config;
        body
    }

    fn map_state(state: &ContainerState) -> RuntimeStatus {
        match state.status.as_str() {
            "created" => RuntimeStatus::new(LifecycleState::Created),
            "running" => RuntimeStatus::new(LifecycleState::Running),
            "restarting" => RuntimeStatus::new(LifecycleState::Restarting),
            "paused" => RuntimeStatus::with_reason(LifecycleState::Stopped, "paused"),
            "exited" => RuntimeStatus::with_reason(
                LifecycleState::Stopped,
                &format!("exit code {}", state.exit_code),
            ),
            "removing" => RuntimeStatus::new(LifecycleState::Removed),
            "dead" => RuntimeStatus::with_reason(LifecycleState::Error, &state.error),
            other => RuntimeStatus::with_reason(
                LifecycleState::Error,
                &format!("unknown engine state '{}'", other),
            ),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerApiRuntime {
    async fn ensure_network(&self, network: &NetworkSpec) -> Result<()> {
        let path = format!("/networks/{}", network.name);
        let response = self.call(Method::GET, &path, &[], None).await?;
        if response.status.is_success() {
            return Ok(());
        }
        if response.status != StatusCode::NOT_FOUND {
            Self::check(response, "network inspect")?;
            return Ok(());
        }

        let body = json!({
            "Name": network.name,
            "Driver": network.driver_or_default(),
            "Internal": network.flags.internal.unwrap_or(false),
            "Attachable": network.flags.attachable.unwrap_or(false),
            "EnableIPv6": network.flags.enable_ipv6.unwrap_or(false),
            "CheckDuplicate": true,
        });
        let response = self
            .call(Method::POST, "/networks/create", &[], Some(&body))
            .await?;
        Self::check(response, "network create")?;
        tracing::info!("Created network {}", network.name);
        Ok(())
    }

    async fn create(&self, config: &ContainerConfig) -> Result<()> {
        let body = Self::create_body(config);
        let mut response = self.create_container(config, &body).await?;
        if response.status == StatusCode::NOT_FOUND
            && response.message().to_ascii_lowercase().contains("no such image")
        {
            self.pull(&config.image).await?;
            response = self.create_container(config, &body).await?;
        }
        Self::check(response, "create")?;

        for network in config.networks.iter().skip(1) {
            let body = json!({
                "Container": config.name,
                "EndpointConfig": { "Aliases": [config.service] },
            });
            let path = format!("/networks/{}/connect", network);
            let response = self.call(Method::POST, &path, &[], Some(&body)).await?;
            Self::check(response, "network connect")?;
        }
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        let path = format!("/containers/{}/start", name);
        Self::check(self.call(Method::POST, &path, &[], None).await?, "start")?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let path = format!("/containers/{}/stop", name);
        Self::check(self.call(Method::POST, &path, &[], None).await?, "stop")?;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        let path = format!("/containers/{}/restart", name);
        Self::check(self.call(Method::POST, &path, &[], None).await?, "restart")?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let path = format!("/containers/{}", name);
        Self::check(self.call(Method::DELETE, &path, &[], None).await?, "remove")?;
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<RuntimeStatus>> {
        let path = format!("/containers/{}/json", name);
        let response = self.call(Method::GET, &path, &[], None).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let inspect: InspectResponse = Self::check(response, "inspect")?.json()?;
        Ok(Some(Self::map_state(&inspect.state)))
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>> {
        let path = format!("/containers/{}/logs", name);
        let tail = tail.to_string();
        let query = [("stdout", "true"), ("stderr", "true"), ("tail", tail.as_str())];
        let response = self.call(Method::GET, &path, &query, None).await?;
        let response = Self::check(response, "logs")?;
        Ok(demux(&response.body).lines().map(str::to_string).collect())
    }
}

fn transport_error(e: reqwest::Error) -> FleetError {
    if e.is_connect() || e.is_timeout() {
        FleetError::RuntimeUnavailable {
            reason: e.to_string(),
            last_known: None,
        }
    } else {
        FleetError::Runtime(e.to_string())
    }
}

/// Split an image reference into repository and tag; digests are passed whole
fn split_image(image: &str) -> (&str, Option<&str>) {
    if image.contains('@') {
        return (image, None);
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], Some(&image[name_start + i + 1..])),
        None => (image, Some("latest")),
    }
}

/// Join the frames of a log stream
///
/// Containers without a TTY multiplex stdout and stderr, each frame led by an
/// 8 byte header: stream id, three zero bytes, big-endian payload length.
fn demux(body: &[u8]) -> String {
    let framed = body.len() >= 8 && body[0] <= 2 && body[1..4] == [0, 0, 0];
    if !framed {
        return String::from_utf8_lossy(body).into_owned();
    }

    let mut out = Vec::new();
    let mut rest = body;
    while rest.len() >= 8 {
        let size = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (8 + size).min(rest.len());
        out.extend_from_slice(&rest[8..end]);
        rest = &rest[end..];
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{GpuReservation, PortBinding, ServiceSpec, VolumeBind};
    use std::path::Path;

    #[test]
    fn test_base_url() {
        assert_eq!(
            DockerApiRuntime::base_url("tcp://localhost:2375").unwrap(),
            "http://localhost:2375"
        );
        assert_eq!(
            DockerApiRuntime::base_url("https://docker.internal:2376/").unwrap(),
            "https://docker.internal:2376"
        );
        assert!(matches!(
            DockerApiRuntime::base_url("ssh://docker.internal"),
            Err(FleetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_default_host_is_the_socket() {
        let runtime = DockerApiRuntime::new(DEFAULT_DOCKER_HOST, Duration::from_secs(1)).unwrap();
        match &runtime.transport {
            Transport::Unix(socket) => {
                assert_eq!(socket.path(), Path::new("/var/run/docker.sock"))
            }
            Transport::Tcp { .. } => panic!("expected the unix socket"),
        }
    }

    #[test]
    fn test_target_encodes_query() {
        assert_eq!(
            DockerApiRuntime::target("/containers/bot1/json", &[]).unwrap(),
            "/v1.43/containers/bot1/json"
        );
        assert_eq!(
            DockerApiRuntime::target(
                "/images/create",
                &[("fromImage", "freqtradeorg/freqtrade"), ("tag", "stable")]
            )
            .unwrap(),
            "/v1.43/images/create?fromImage=freqtradeorg%2Ffreqtrade&tag=stable"
        );
    }

    #[test]
    fn test_split_image() {
        assert_eq!(
            split_image("freqtradeorg/freqtrade:stable"),
            ("freqtradeorg/freqtrade", Some("stable"))
        );
        assert_eq!(split_image("nginx"), ("nginx", Some("latest")));
        assert_eq!(
            split_image("registry.local:5000/bots/ft"),
            ("registry.local:5000/bots/ft", Some("latest"))
        );
        assert_eq!(split_image("ft@sha256:abcd"), ("ft@sha256:abcd", None));
    }

    #[test]
    fn test_demux() {
        let mut framed = vec![1, 0, 0, 0, 0, 0, 0, 6];
        framed.extend_from_slice(b"hello\n");
        framed.extend_from_slice(&[2, 0, 0, 0, 0, 0, 0, 6]);
        framed.extend_from_slice(b"world\n");
        assert_eq!(demux(&framed), "hello\nworld\n");
        assert_eq!(demux(b"plain tty output\n"), "plain tty output\n");
    }

    #[test]
    fn test_create_body() {
        let spec = ServiceSpec::new("bot1", "freqtradeorg/freqtrade:stable")
            .port(PortBinding::new(8081, 8080).host_ip("127.0.0.1"))
            .volume(VolumeBind::new("./user_data", "/freqtrade/user_data"))
            .network("freqtrade")
            .network("monitoring")
            .restart(RestartPolicy::UnlessStopped)
            .gpu(GpuReservation::new("nvidia"));
        let config = ContainerConfig::from_service(&spec, Path::new("/srv/fleet"));
        let body = DockerApiRuntime::create_body(&config);

        assert_eq!(body["Image"], "freqtradeorg/freqtrade:stable");
        assert!(body.get("Cmd").is_none());
        assert_eq!(
            body["HostConfig"]["PortBindings"]["8080/tcp"][0]["HostPort"],
            "8081"
        );
        assert_eq!(
            body["HostConfig"]["Binds"][0],
            "/srv/fleet/user_data:/freqtrade/user_data"
        );
        assert_eq!(body["HostConfig"]["RestartPolicy"]["Name"], "unless-stopped");
        assert_eq!(body["HostConfig"]["NetworkMode"], "freqtrade");
        assert_eq!(body["HostConfig"]["DeviceRequests"][0]["Driver"], "nvidia");
        assert!(body["NetworkingConfig"]["EndpointsConfig"]["freqtrade"].is_object());
    }

    #[test]
    fn test_map_state() {
        let exited = ContainerState {
            status: "exited".into(),
            exit_code: 137,
            error: String::new(),
        };
        let status = DockerApiRuntime::map_state(&exited);
        assert_eq!(status.state, LifecycleState::Stopped);
        assert_eq!(status.reason.as_deref(), Some("exit code 137"));

        let paused = ContainerState {
            status: "paused".into(),
            exit_code: 0,
            error: String::new(),
        };
        assert_eq!(DockerApiRuntime::map_state(&paused).state, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_unreachable_engine() {
        // Nothing listens on port 1
        let runtime =
            DockerApiRuntime::new("tcp://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let err = runtime.inspect("bot1").await.unwrap_err();
        assert!(matches!(err, FleetError::RuntimeUnavailable { .. }));

        let temp = tempfile::tempdir().unwrap();
        let host = format!("unix://{}", temp.path().join("docker.sock").display());
        let runtime = DockerApiRuntime::new(&host, Duration::from_millis(500)).unwrap();
        let err = runtime.inspect("bot1").await.unwrap_err();
        assert!(matches!(err, FleetError::RuntimeUnavailable { .. }));
    }

    fn reply(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    fn chunked(status: &str, chunks: &[&str]) -> String {
        let mut out = format!("HTTP/1.1 {}\r\nTransfer-Encoding: chunked\r\n\r\n", status);
        for chunk in chunks {
            out.push_str(&format!("{:x}\r\n{}\r\n", chunk.len(), chunk));
        }
        out.push_str("0\r\n\r\n");
        out
    }

    async fn read_request(stream: &mut tokio::net::UnixStream) -> String {
        use tokio::io::AsyncReadExt;

        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
                let length: usize = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .map(|v| v.trim().parse().unwrap())
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    /// Engine stand-in answering one canned response per connection,
    /// returning the request lines it saw
    fn fake_engine(
        dir: &Path,
        responses: Vec<String>,
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        use tokio::io::AsyncWriteExt;

        let path = dir.join("docker.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_request(&mut stream).await;
                seen.push(request.lines().next().unwrap_or_default().to_string());
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
            seen
        });
        (format!("unix://{}", path.display()), handle)
    }

    #[tokio::test]
    async fn test_inspect_over_socket() {
        let temp = tempfile::tempdir().unwrap();
        let (host, engine) = fake_engine(
            temp.path(),
            vec![
                chunked("200 OK", &[r#"{"State":{"Status":"#, r#""running","ExitCode":0}}"#]),
                reply("404 Not Found", r#"{"message":"No such container: bot2"}"#),
            ],
        );
        let runtime = DockerApiRuntime::new(&host, Duration::from_secs(5)).unwrap();

        let status = runtime.inspect("bot1").await.unwrap().unwrap();
        assert_eq!(status.state, LifecycleState::Running);
        assert!(runtime.inspect("bot2").await.unwrap().is_none());

        let seen = engine.await.unwrap();
        assert_eq!(seen[0], "GET /v1.43/containers/bot1/json HTTP/1.1");
    }

    #[tokio::test]
    async fn test_create_pulls_missing_image() {
        let temp = tempfile::tempdir().unwrap();
        let (host, engine) = fake_engine(
            temp.path(),
            vec![
                reply(
                    "404 Not Found",
                    r#"{"message":"No such image: freqtradeorg/freqtrade:stable"}"#,
                ),
                chunked(
                    "200 OK",
                    &[
                        "{\"status\":\"Pulling from freqtradeorg/freqtrade\"}\n",
                        "{\"status\":\"Download complete\"}\n",
                    ],
                ),
                reply("201 Created", r#"{"Id":"4f2a","Warnings":[]}"#),
            ],
        );
        let runtime = DockerApiRuntime::new(&host, Duration::from_secs(5)).unwrap();
        let spec = ServiceSpec::new("bot1", "freqtradeorg/freqtrade:stable");
        let config = ContainerConfig::from_service(&spec, Path::new("/srv/fleet"));

        runtime.create(&config).await.unwrap();
        let seen = engine.await.unwrap();
        assert_eq!(
            seen,
            vec![
                "POST /v1.43/containers/create?name=bot1 HTTP/1.1",
                "POST /v1.43/images/create?fromImage=freqtradeorg%2Ffreqtrade&tag=stable HTTP/1.1",
                "POST /v1.43/containers/create?name=bot1 HTTP/1.1",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_pull_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let (host, _engine) = fake_engine(
            temp.path(),
            vec![
                reply("404 Not Found", r#"{"message":"No such image: ghost:1"}"#),
                chunked(
                    "200 OK",
                    &["{\"error\":\"manifest for ghost:1 not found\"}\n"],
                ),
            ],
        );
        let runtime = DockerApiRuntime::new(&host, Duration::from_secs(5)).unwrap();
        let config = ContainerConfig::from_service(&ServiceSpec::new("bot1", "ghost:1"), Path::new("/"));

        match runtime.create(&config).await {
            Err(FleetError::Runtime(msg)) => assert!(msg.contains("manifest for ghost:1")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_logs_over_socket() {
        let temp = tempfile::tempdir().unwrap();
        let mut frame = vec![1u8, 0, 0, 0, 0, 0, 0, 12];
        frame.extend_from_slice(b"bot started\n");
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
            frame.len()
        );
        let mut raw = response.into_bytes();
        raw.extend_from_slice(&frame);
        let (host, engine) = fake_engine(
            temp.path(),
            vec![String::from_utf8(raw).unwrap()],
        );
        let runtime = DockerApiRuntime::new(&host, Duration::from_secs(5)).unwrap();

        assert_eq!(runtime.logs("bot1", 100).await.unwrap(), vec!["bot started"]);
        let seen = engine.await.unwrap();
        assert_eq!(
            seen[0],
            "GET /v1.43/containers/bot1/logs?stdout=true&stderr=true&tail=100 HTTP/1.1"
        );
    }
}
