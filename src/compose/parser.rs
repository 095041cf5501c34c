//! Docker Compose file parser and serializer
//!
//! The file is read as a generic YAML tree and split into the modelled fields
//! and everything else. Unmodelled keys are carried on the owning service,
//! network, volume or on the document itself and written back unchanged.

use super::config::{
    CommandSpec, GpuReservation, NetworkFlags, NetworkSpec, PortBinding, Protocol, ServiceNetwork,
    ServiceSpec, VolumeBind, VolumeSpec,
};
use super::document::ComposeDocument;
use crate::error::{FleetError, Result};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Default compose file names
pub const DEFAULT_COMPOSE_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Top-level keys written before `services`
const LEADING_KEYS: &[&str] = &["version", "name"];

/// Compose file parser
pub struct ComposeParser;

impl ComposeParser {
    /// Find compose file in directory
    pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
        for name in DEFAULT_COMPOSE_FILES {
            let path = dir.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Parse compose file from path
    pub fn parse_file(path: &Path) -> Result<ComposeDocument> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content)
    }

    /// Parse compose file from string and check every document invariant
    pub fn parse_str(content: &str) -> Result<ComposeDocument> {
        let root: Value = serde_yaml::from_str(content)
            .map_err(|e| FleetError::DocumentInvalid(format!("Failed to parse YAML: {}", e)))?;

        let document = Self::from_value(root)?;
        document
            .validate()
            .map_err(|e| FleetError::DocumentInvalid(e.to_string()))?;
        Ok(document)
    }

    /// Build a document from a YAML tree without checking invariants
    pub fn from_value(root: Value) -> Result<ComposeDocument> {
        let root = match root {
            Value::Null => Mapping::new(),
            Value::Mapping(m) => m,
            _ => return Err(invalid("top level must be a mapping")),
        };

        let mut services = Vec::new();
        let mut networks = Vec::new();
        let mut volumes = Vec::new();
        let mut extra = Mapping::new();

        for (key, value) in root {
            match key.as_str() {
                Some("services") => {
                    for (name, body) in entries(value, "services")? {
                        services.push(parse_service(&name, body)?);
                    }
                }
                Some("networks") => {
                    for (name, body) in entries(value, "networks")? {
                        networks.push(parse_network(&name, body)?);
                    }
                }
                Some("volumes") => {
                    for (name, body) in entries(value, "volumes")? {
                        volumes.push(parse_volume(&name, body)?);
                    }
                }
                _ => {
                    extra.insert(key, value);
                }
            }
        }

        Ok(ComposeDocument::from_parts(services, networks, volumes, extra))
    }

    /// Serialize a document to YAML
    pub fn to_yaml(document: &ComposeDocument) -> Result<String> {
        Ok(serde_yaml::to_string(&Self::to_value(document))?)
    }

    /// Convert a document into a YAML tree with deterministic key order
    pub fn to_value(document: &ComposeDocument) -> Value {
        let mut root = Mapping::new();

        for key in LEADING_KEYS {
            if let Some(value) = document.extra().get(*key) {
                root.insert(Value::from(*key), value.clone());
            }
        }

        let mut services = Mapping::new();
        for service in document.list_services() {
            services.insert(Value::from(service.name.as_str()), service_to_value(service));
        }
        root.insert(Value::from("services"), Value::Mapping(services));

        if !document.networks().is_empty() {
            let mut networks = Mapping::new();
            for network in document.networks() {
                networks.insert(Value::from(network.name.as_str()), network_to_value(network));
            }
            root.insert(Value::from("networks"), Value::Mapping(networks));
        }

        if !document.volumes().is_empty() {
            let mut volumes = Mapping::new();
            for volume in document.volumes() {
                volumes.insert(Value::from(volume.name.as_str()), volume_to_value(volume));
            }
            root.insert(Value::from("volumes"), Value::Mapping(volumes));
        }

        for (key, value) in document.extra() {
            if key.as_str().map(|k| LEADING_KEYS.contains(&k)).unwrap_or(false) {
                continue;
            }
            root.insert(key.clone(), value.clone());
        }

        Value::Mapping(root)
    }

    /// Parse and validate raw content, returning non-fatal findings
    pub fn lint(content: &str) -> Result<Vec<String>> {
        let document = Self::parse_str(content)?;
        let mut warnings = Vec::new();

        if document.extra().contains_key("version") {
            warnings.push("Top-level 'version' is obsolete and ignored by Docker Compose".to_string());
        }

        for service in document.list_services() {
            if service.restart.is_none() {
                warnings.push(format!("Service '{}' has no restart policy", service.name));
            }
            for bind in &service.volumes {
                if let Some(source) = bind.source.as_deref() {
                    if bind.is_named_volume() && document.get_volume(source).is_none() {
                        warnings.push(format!(
                            "Service '{}' mounts undeclared volume '{}'",
                            service.name, source
                        ));
                    }
                }
            }
        }

        for (network, count) in crate::network::NetworkGuard::reference_counts(&document) {
            if count == 0 {
                warnings.push(format!("Network '{}' is not used by any service", network));
            }
        }

        Ok(warnings)
    }
}

fn invalid(message: impl Into<String>) -> FleetError {
    FleetError::DocumentInvalid(message.into())
}

/// Named entries of a top-level section; a null section is empty
fn entries(value: Value, section: &str) -> Result<Vec<(String, Value)>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Mapping(map) => map
            .into_iter()
            .map(|(k, v)| match k.as_str() {
                Some(name) => Ok((name.to_string(), v)),
                None => Err(invalid(format!("'{}' keys must be strings", section))),
            })
            .collect(),
        _ => Err(invalid(format!("'{}' must be a mapping", section))),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn expect_string(value: &Value, what: &str) -> Result<String> {
    scalar_string(value).ok_or_else(|| invalid(format!("{} must be a string", what)))
}

fn expect_seq(value: Value, what: &str) -> Result<Vec<Value>> {
    match value {
        Value::Sequence(seq) => Ok(seq),
        Value::Null => Ok(Vec::new()),
        // A lone scalar is accepted as a one-element list
        Value::String(_) | Value::Number(_) => Ok(vec![value]),
        _ => Err(invalid(format!("{} must be a list", what))),
    }
}

fn parse_port_number(s: &str, what: &str) -> Result<u16> {
    s.parse::<u16>().map_err(|_| {
        if s.contains('-') {
            invalid(format!("{}: port ranges are not supported ('{}')", what, s))
        } else {
            invalid(format!("{}: invalid port '{}'", what, s))
        }
    })
}

fn port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(?P<host>[^:]*):)?(?P<container>[^:/]+)(?:/(?P<proto>[A-Za-z]+))?$")
            .expect("port pattern is valid")
    })
}

/// Parse short port syntax: `[ip:][host:]container[/proto]`
fn parse_short_port(service: &str, raw: &str) -> Result<PortBinding> {
    let what = format!("service '{}' port", service);
    if raw.contains("${") {
        return Err(invalid(format!(
            "{}: '{}' uses variable interpolation, which is not supported",
            what, raw
        )));
    }

    let (host_ip, rest) = if let Some(stripped) = raw.strip_prefix('[') {
        let (ip, rest) = stripped
            .split_once("]:")
            .ok_or_else(|| invalid(format!("{}: malformed '{}'", what, raw)))?;
        (Some(ip.to_string()), rest)
    } else if raw.matches(':').count() == 2 {
        let (ip, rest) = raw.split_once(':').unwrap_or(("", raw));
        (Some(ip.to_string()), rest)
    } else {
        (None, raw)
    };

    let caps = port_pattern()
        .captures(rest)
        .ok_or_else(|| invalid(format!("{}: malformed '{}'", what, raw)))?;

    let host_port = match caps.name("host").map(|m| m.as_str()) {
        Some("") | None => None,
        Some(h) => Some(parse_port_number(h, &what)?),
    };
    let container_port = parse_port_number(&caps["container"], &what)?;
    let protocol = match caps.name("proto") {
        Some(p) => p
            .as_str()
            .parse::<Protocol>()
            .map_err(|e| invalid(format!("{}: {}", what, e)))?,
        None => Protocol::Tcp,
    };

    Ok(PortBinding {
        host_ip: host_ip.filter(|ip| !ip.is_empty()),
        host_port,
        container_port,
        protocol,
        long_form: None,
    })
}

fn parse_long_port(service: &str, map: Mapping) -> Result<PortBinding> {
    let what = format!("service '{}' port", service);

    let mut binding = PortBinding::default();
    let mut target = None;
    let mut rest = Mapping::new();
    for (key, value) in map {
        match key.as_str() {
            Some("target") => {
                target = Some(parse_port_number(&expect_string(&value, &what)?, &what)?)
            }
            Some("published") if !value.is_null() => {
                binding.host_port = Some(parse_port_number(&expect_string(&value, &what)?, &what)?)
            }
            Some("published") => {}
            Some("host_ip") => binding.host_ip = Some(expect_string(&value, &what)?),
            Some("protocol") => {
                binding.protocol = expect_string(&value, &what)?
                    .parse::<Protocol>()
                    .map_err(|e| invalid(format!("{}: {}", what, e)))?
            }
            _ => {
                rest.insert(key, value);
            }
        }
    }

    binding.container_port =
        target.ok_or_else(|| invalid(format!("{}: long syntax requires 'target'", what)))?;
    binding.long_form = Some(rest);
    Ok(binding)
}

fn parse_volume_bind(service: &str, value: Value) -> Result<VolumeBind> {
    let what = format!("service '{}' volume", service);
    match value {
        Value::String(raw) => {
            let parts: Vec<&str> = raw.split(':').collect();
            let bind = match parts.as_slice() {
                [target] => VolumeBind {
                    target: target.to_string(),
                    ..VolumeBind::default()
                },
                [source, target] => VolumeBind::new(source, target),
                [source, target, options] => VolumeBind {
                    options: Some(options.to_string()),
                    ..VolumeBind::new(source, target)
                },
                _ => return Err(invalid(format!("{}: malformed '{}'", what, raw))),
            };
            Ok(bind)
        }
        Value::Mapping(map) => {
            let mut bind = VolumeBind::default();
            let mut target = None;
            let mut rest = Mapping::new();
            for (key, value) in map {
                match key.as_str() {
                    Some("target") => target = Some(expect_string(&value, &what)?),
                    Some("source") => bind.source = Some(expect_string(&value, &what)?),
                    Some("read_only") if value.as_bool() == Some(true) => {
                        bind.options = Some("ro".to_string());
                    }
                    _ => {
                        rest.insert(key, value);
                    }
                }
            }
            bind.target =
                target.ok_or_else(|| invalid(format!("{}: long syntax requires 'target'", what)))?;
            bind.long_form = Some(rest);
            Ok(bind)
        }
        _ => Err(invalid(format!("{} must be a string or mapping", what))),
    }
}

fn parse_networks(service: &str, value: Value) -> Result<Vec<ServiceNetwork>> {
    let what = format!("service '{}' networks", service);
    match value {
        Value::Mapping(map) => map
            .into_iter()
            .map(|(k, v)| -> Result<ServiceNetwork> {
                Ok(ServiceNetwork {
                    name: expect_string(&k, &what)?,
                    options: (!v.is_null()).then_some(v),
                })
            })
            .collect(),
        other => expect_seq(other, &what)?
            .iter()
            .map(|v| -> Result<ServiceNetwork> { Ok(ServiceNetwork::new(&expect_string(v, &what)?)) })
            .collect(),
    }
}

fn parse_environment(service: &str, value: Value) -> Result<Vec<String>> {
    let what = format!("service '{}' environment", service);
    match value {
        Value::Mapping(map) => map
            .into_iter()
            .map(|(k, v)| -> Result<String> {
                let key = expect_string(&k, &what)?;
                Ok(match scalar_string(&v) {
                    Some(val) => format!("{}={}", key, val),
                    None => key,
                })
            })
            .collect(),
        other => expect_seq(other, &what)?
            .iter()
            .map(|v| expect_string(v, &what))
            .collect(),
    }
}

/// Pull a plain GPU device reservation out of a `deploy` block.
///
/// Only devices made of `driver`, `count` and `capabilities: [gpu]` are
/// modelled; anything richer stays in the block untouched.
fn take_gpu(deploy: &mut Mapping) -> Option<GpuReservation> {
    let devices = deploy
        .get_mut("resources")?
        .as_mapping_mut()?
        .get_mut("reservations")?
        .as_mapping_mut()?
        .get_mut("devices")?
        .as_sequence_mut()?;

    let index = devices.iter().position(|device| {
        let Some(map) = device.as_mapping() else {
            return false;
        };
        let plain = map.keys().all(|k| {
            matches!(k.as_str(), Some("driver") | Some("count") | Some("capabilities"))
        });
        let gpu_only = map
            .get("capabilities")
            .and_then(Value::as_sequence)
            .map(|caps| caps.len() == 1 && caps[0].as_str() == Some("gpu"))
            .unwrap_or(false);
        plain && gpu_only && gpu_count(map.get("count")).is_some()
    })?;

    let device = devices.remove(index);
    let driver = device
        .get("driver")
        .and_then(Value::as_str)
        .unwrap_or("nvidia")
        .to_string();
    let count = gpu_count(device.get("count")).flatten();

    prune_empty(deploy, &["resources", "reservations", "devices"]);
    Some(GpuReservation { driver, count })
}

/// Device count, `None` meaning all devices; unreadable counts are not modelled
fn gpu_count(value: Option<&Value>) -> Option<Option<i64>> {
    match value {
        None => Some(None),
        Some(Value::Number(n)) => n.as_i64().map(Some),
        Some(Value::String(s)) if s == "all" => Some(None),
        Some(Value::String(s)) => s.trim().parse().ok().map(Some),
        _ => None,
    }
}

/// Remove the innermost empty container along `path`, walking outwards
fn prune_empty(root: &mut Mapping, path: &[&str]) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if let Some(child) = root.get_mut(*first) {
        if let Some(map) = child.as_mapping_mut() {
            prune_empty(map, rest);
        }
        let empty = match child {
            Value::Mapping(m) => m.is_empty(),
            Value::Sequence(s) => s.is_empty(),
            _ => false,
        };
        if empty {
            root.remove(*first);
        }
    }
}

fn child_mapping<'a>(parent: &'a mut Mapping, key: &str) -> &'a mut Mapping {
    let slot = parent
        .entry(Value::from(key))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !slot.is_mapping() {
        *slot = Value::Mapping(Mapping::new());
    }
    match slot {
        Value::Mapping(m) => m,
        _ => unreachable!("slot was just made a mapping"),
    }
}

fn put_gpu(deploy: &mut Mapping, gpu: &GpuReservation) {
    let reservations = child_mapping(child_mapping(deploy, "resources"), "reservations");
    let devices = reservations
        .entry(Value::from("devices"))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    if !devices.is_sequence() {
        *devices = Value::Sequence(Vec::new());
    }

    let mut device = Mapping::new();
    device.insert(Value::from("driver"), Value::from(gpu.driver.as_str()));
    device.insert(
        Value::from("count"),
        match gpu.count {
            Some(n) => Value::from(n),
            None => Value::from("all"),
        },
    );
    device.insert(
        Value::from("capabilities"),
        Value::Sequence(vec![Value::from("gpu")]),
    );
    if let Value::Sequence(seq) = devices {
        seq.push(Value::Mapping(device));
    }
}

fn parse_service(name: &str, body: Value) -> Result<ServiceSpec> {
    let map = match body {
        Value::Mapping(m) => m,
        _ => return Err(invalid(format!("service '{}' must be a mapping", name))),
    };

    let mut spec = ServiceSpec::new(name, "");
    let mut image = None;

    for (key, value) in map {
        let field = key.as_str().map(str::to_string);
        match field.as_deref() {
            Some("image") => image = Some(expect_string(&value, &format!("service '{}' image", name))?),
            Some("container_name") => {
                spec.container_name =
                    Some(expect_string(&value, &format!("service '{}' container_name", name))?)
            }
            Some("restart") => {
                let raw = expect_string(&value, &format!("service '{}' restart", name))?;
                spec.restart = Some(
                    raw.parse()
                        .map_err(|e| invalid(format!("service '{}': {}", name, e)))?,
                );
            }
            Some("ports") => {
                for entry in expect_seq(value, &format!("service '{}' ports", name))? {
                    let binding = match entry {
                        Value::Mapping(m) => parse_long_port(name, m)?,
                        other => {
                            let raw = expect_string(&other, &format!("service '{}' port", name))?;
                            parse_short_port(name, &raw)?
                        }
                    };
                    spec.ports.push(binding);
                }
            }
            Some("volumes") => {
                for entry in expect_seq(value, &format!("service '{}' volumes", name))? {
                    spec.volumes.push(parse_volume_bind(name, entry)?);
                }
            }
            Some("networks") => spec.networks = parse_networks(name, value)?,
            Some("command") => {
                spec.command = Some(match value {
                    Value::Sequence(seq) => CommandSpec::Exec(
                        seq.iter()
                            .map(|v| expect_string(v, &format!("service '{}' command", name)))
                            .collect::<Result<_>>()?,
                    ),
                    other => CommandSpec::Shell(expect_string(
                        &other,
                        &format!("service '{}' command", name),
                    )?),
                })
            }
            Some("environment") => spec.environment = parse_environment(name, value)?,
            Some("deploy") => match value {
                Value::Mapping(mut deploy) => {
                    spec.gpu = take_gpu(&mut deploy);
                    if !deploy.is_empty() {
                        spec.extra.insert(key, Value::Mapping(deploy));
                    }
                }
                other => {
                    spec.extra.insert(key, other);
                }
            },
            _ => {
                spec.extra.insert(key, value);
            }
        }
    }

    spec.image = image.ok_or_else(|| invalid(format!("service '{}' has no image", name)))?;
    Ok(spec)
}

fn service_to_value(spec: &ServiceSpec) -> Value {
    let mut map = Mapping::new();
    map.insert(Value::from("image"), Value::from(spec.image.as_str()));

    if let Some(container_name) = &spec.container_name {
        map.insert(Value::from("container_name"), Value::from(container_name.as_str()));
    }
    if let Some(restart) = &spec.restart {
        map.insert(Value::from("restart"), Value::from(restart.to_string()));
    }

    let mut deploy = match spec.extra.get("deploy") {
        Some(Value::Mapping(m)) => Some(m.clone()),
        _ => None,
    };
    if let Some(gpu) = &spec.gpu {
        put_gpu(deploy.get_or_insert_with(Mapping::new), gpu);
    }
    if let Some(deploy) = deploy {
        map.insert(Value::from("deploy"), Value::Mapping(deploy));
    }

    if !spec.volumes.is_empty() {
        let volumes = spec.volumes.iter().map(volume_bind_to_value).collect();
        map.insert(Value::from("volumes"), Value::Sequence(volumes));
    }

    match &spec.command {
        Some(CommandSpec::Shell(s)) => {
            map.insert(Value::from("command"), Value::from(s.as_str()));
        }
        Some(CommandSpec::Exec(args)) => {
            let args = args.iter().map(|a| Value::from(a.as_str())).collect();
            map.insert(Value::from("command"), Value::Sequence(args));
        }
        None => {}
    }

    if !spec.environment.is_empty() {
        let env = spec.environment.iter().map(|e| Value::from(e.as_str())).collect();
        map.insert(Value::from("environment"), Value::Sequence(env));
    }

    if !spec.ports.is_empty() {
        let ports = spec.ports.iter().map(port_to_value).collect();
        map.insert(Value::from("ports"), Value::Sequence(ports));
    }

    if !spec.networks.is_empty() {
        let value = if spec.networks.iter().all(|n| n.options.is_none()) {
            Value::Sequence(
                spec.networks
                    .iter()
                    .map(|n| Value::from(n.name.as_str()))
                    .collect(),
            )
        } else {
            let mut nets = Mapping::new();
            for net in &spec.networks {
                nets.insert(
                    Value::from(net.name.as_str()),
                    net.options.clone().unwrap_or(Value::Null),
                );
            }
            Value::Mapping(nets)
        };
        map.insert(Value::from("networks"), value);
    }

    for (key, value) in &spec.extra {
        if key.as_str() == Some("deploy") && value.is_mapping() {
            continue;
        }
        map.insert(key.clone(), value.clone());
    }

    Value::Mapping(map)
}

fn port_to_value(port: &PortBinding) -> Value {
    match &port.long_form {
        None => Value::from(port.to_short_syntax()),
        Some(extra) => {
            let mut map = Mapping::new();
            map.insert(Value::from("target"), Value::from(port.container_port));
            if let Some(host_port) = port.host_port {
                map.insert(Value::from("published"), Value::from(host_port.to_string()));
            }
            if let Some(ip) = &port.host_ip {
                map.insert(Value::from("host_ip"), Value::from(ip.as_str()));
            }
            if port.protocol != Protocol::Tcp {
                map.insert(Value::from("protocol"), Value::from(port.protocol.to_string()));
            }
            for (k, v) in extra {
                map.insert(k.clone(), v.clone());
            }
            Value::Mapping(map)
        }
    }
}

fn volume_bind_to_value(bind: &VolumeBind) -> Value {
    match &bind.long_form {
        None => Value::from(bind.to_short_syntax()),
        Some(extra) => {
            let mut map = Mapping::new();
            if let Some(kind) = extra.get("type") {
                map.insert(Value::from("type"), kind.clone());
            }
            if let Some(source) = &bind.source {
                map.insert(Value::from("source"), Value::from(source.as_str()));
            }
            map.insert(Value::from("target"), Value::from(bind.target.as_str()));
            if bind.is_read_only() {
                map.insert(Value::from("read_only"), Value::Bool(true));
            }
            for (k, v) in extra {
                if !map.contains_key(k) {
                    map.insert(k.clone(), v.clone());
                }
            }
            Value::Mapping(map)
        }
    }
}

fn parse_network(name: &str, body: Value) -> Result<NetworkSpec> {
    let map = match body {
        Value::Null => Mapping::new(),
        Value::Mapping(m) => m,
        _ => return Err(invalid(format!("network '{}' must be a mapping", name))),
    };

    let mut spec = NetworkSpec {
        name: name.to_string(),
        driver: None,
        flags: NetworkFlags::default(),
        extra: Mapping::new(),
    };

    for (key, value) in map {
        let flag = match key.as_str() {
            Some("internal") => Some(&mut spec.flags.internal),
            Some("attachable") => Some(&mut spec.flags.attachable),
            Some("external") => Some(&mut spec.flags.external),
            Some("enable_ipv6") => Some(&mut spec.flags.enable_ipv6),
            _ => None,
        };
        if let (Some(slot), Some(b)) = (flag, value.as_bool()) {
            *slot = Some(b);
            continue;
        }
        match key.as_str() {
            Some("driver") => {
                spec.driver = Some(expect_string(&value, &format!("network '{}' driver", name))?)
            }
            _ => {
                spec.extra.insert(key, value);
            }
        }
    }

    Ok(spec)
}

fn network_to_value(spec: &NetworkSpec) -> Value {
    let mut map = Mapping::new();
    if let Some(driver) = &spec.driver {
        map.insert(Value::from("driver"), Value::from(driver.as_str()));
    }
    let flags = [
        ("internal", spec.flags.internal),
        ("attachable", spec.flags.attachable),
        ("external", spec.flags.external),
        ("enable_ipv6", spec.flags.enable_ipv6),
    ];
    for (key, flag) in flags {
        if let Some(b) = flag {
            map.insert(Value::from(key), Value::Bool(b));
        }
    }
    for (k, v) in &spec.extra {
        map.insert(k.clone(), v.clone());
    }
    Value::Mapping(map)
}

fn parse_volume(name: &str, body: Value) -> Result<VolumeSpec> {
    let map = match body {
        Value::Null => Mapping::new(),
        Value::Mapping(m) => m,
        _ => return Err(invalid(format!("volume '{}' must be a mapping", name))),
    };

    let mut spec = VolumeSpec::new(name);
    for (key, value) in map {
        match key.as_str() {
            Some("driver") => {
                spec.driver = Some(expect_string(&value, &format!("volume '{}' driver", name))?)
            }
            Some("driver_opts") => {
                let opts: Option<BTreeMap<String, String>> = value.as_mapping().and_then(|m| {
                    m.iter()
                        .map(|(k, v)| Some((scalar_string(k)?, scalar_string(v)?)))
                        .collect()
                });
                match opts {
                    Some(opts) => spec.driver_opts = opts,
                    None => {
                        spec.extra.insert(key, value);
                    }
                }
            }
            _ => {
                spec.extra.insert(key, value);
            }
        }
    }
    Ok(spec)
}

fn volume_to_value(spec: &VolumeSpec) -> Value {
    let mut map = Mapping::new();
    if let Some(driver) = &spec.driver {
        map.insert(Value::from("driver"), Value::from(driver.as_str()));
    }
    if !spec.driver_opts.is_empty() {
        let mut opts = Mapping::new();
        for (k, v) in &spec.driver_opts {
            opts.insert(Value::from(k.as_str()), Value::from(v.as_str()));
        }
        map.insert(Value::from("driver_opts"), Value::Mapping(opts));
    }
    for (k, v) in &spec.extra {
        map.insert(k.clone(), v.clone());
    }
    Value::Mapping(map)
}
