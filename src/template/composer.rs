//! Trading config composition from templates

use super::pairlist::Pairlist;
use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Fields a template must carry to be usable by the bot
pub const REQUIRED_FIELDS: &[&str] = &["exchange", "timeframe"];

/// Pairlist handler written in front of the `pairlists` chain
const STATIC_PAIRLIST: &str = "StaticPairList";

/// A validated, read-only template
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTemplate {
    name: String,
    value: Value,
}

impl ConfigTemplate {
    /// Parse template JSON
    pub fn parse(name: &str, content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| FleetError::InvalidTemplate(format!("{}: {}", name, e)))?;
        Self::from_value(name, value)
    }

    /// Wrap an already decoded template
    pub fn from_value(name: &str, value: Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            FleetError::InvalidTemplate(format!("{}: top level must be an object", name))
        })?;
        for field in REQUIRED_FIELDS {
            if !object.contains_key(*field) {
                return Err(FleetError::MissingRequiredField(field.to_string()));
            }
        }
        Ok(Self {
            name: name.to_string(),
            value,
        })
    }

    /// Load a template file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::parse(&name, &content)
    }

    /// Template name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Template content
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Fields a composition may override.
///
/// When decoded from JSON, unknown keys are ignored so newer callers can send
/// fields this version does not know about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    /// Top-level `strategy`
    #[serde(default, alias = "strategyName")]
    pub strategy_name: Option<String>,
    /// Static pairlist to trade
    #[serde(default)]
    pub pairlist: Option<Pairlist>,
    /// `api_server.listen_port`
    #[serde(default, alias = "apiPort")]
    pub api_port: Option<u16>,
    /// `bot_name`
    #[serde(default)]
    pub identifier: Option<String>,
    /// `dry_run`
    #[serde(default, alias = "dryRun")]
    pub dry_run: Option<bool>,
}

impl ConfigOverrides {
    /// Decode overrides from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn strategy(mut self, name: &str) -> Self {
        self.strategy_name = Some(name.to_string());
        self
    }

    pub fn pairlist(mut self, pairlist: Pairlist) -> Self {
        self.pairlist = Some(pairlist);
        self
    }

    pub fn api_port(mut self, port: u16) -> Self {
        self.api_port = Some(port);
        self
    }

    pub fn identifier(mut self, identifier: &str) -> Self {
        self.identifier = Some(identifier.to_string());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }
}

/// A composed trading config
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigArtifact {
    value: Value,
}

impl ConfigArtifact {
    /// Config content
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub(crate) fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    /// Look up a value by JSON pointer, e.g. `/api_server/listen_port`
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.value.pointer(pointer)
    }

    /// Pretty JSON with four-space indentation
    pub fn to_pretty_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.value.serialize(&mut ser)?;
        String::from_utf8(buf).map_err(|e| FleetError::InvalidTemplate(e.to_string()))
    }

    /// Write the artifact to `path`, creating parent directories
    pub fn write(&self, path: &Path) -> Result<()> {
        let content = self.to_pretty_json()?;
        let persist = |source| FleetError::Persistence {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(persist)?;
        }
        std::fs::write(path, content).map_err(persist)?;
        tracing::info!("Wrote config {}", path.display());
        Ok(())
    }
}

/// Builds trading configs from templates
#[derive(Debug, Clone, Default)]
pub struct TemplateComposer {
    search_dirs: Vec<PathBuf>,
}

impl TemplateComposer {
    /// Create a composer that looks for templates in `search_dirs`, in order
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// Find a template file by name
    pub fn find_template(&self, name: &str) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_absolute() && direct.is_file() {
            return Some(direct.to_path_buf());
        }
        self.search_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Find and load a template by name
    pub fn load_template(&self, name: &str) -> Result<ConfigTemplate> {
        let path = self.find_template(name).ok_or_else(|| {
            FleetError::InvalidTemplate(format!("template '{}' not found", name))
        })?;
        ConfigTemplate::load(&path)
    }

    /// Apply `overrides` to a copy of `template`
    pub fn compose(
        &self,
        template: &ConfigTemplate,
        overrides: &ConfigOverrides,
    ) -> Result<ConfigArtifact> {
        let mut value = template.value.clone();
        let config = value
            .as_object_mut()
            .ok_or_else(|| FleetError::InvalidTemplate("top level must be an object".into()))?;

        if let Some(strategy) = &overrides.strategy_name {
            config.insert("strategy".into(), Value::from(strategy.as_str()));
        }

        if let Some(pairlist) = &overrides.pairlist {
            apply_pairlist(config, pairlist)?;
        }

        if let Some(port) = overrides.api_port {
            let api = object_mut(config, "api_server")?;
            api.insert("enabled".into(), Value::Bool(true));
            api.insert("listen_ip_address".into(), Value::from("0.0.0.0"));
            api.insert("listen_port".into(), Value::from(port));
        }

        if let Some(identifier) = &overrides.identifier {
            config.insert("bot_name".into(), Value::from(identifier.as_str()));
            if let Some(Value::Object(freqai)) = config.get_mut("freqai") {
                freqai.insert(
                    "identifier".into(),
                    Value::from(format!("freqai_{}", identifier)),
                );
            }
        }

        if let Some(dry_run) = overrides.dry_run {
            config.insert("dry_run".into(), Value::Bool(dry_run));
        }

        fill_api_secrets(config);

        tracing::debug!("Composed config from template {}", template.name);
        Ok(ConfigArtifact { value })
    }

    /// Parse `template` and compose in one step
    pub fn compose_str(&self, template: &str, overrides: &ConfigOverrides) -> Result<ConfigArtifact> {
        self.compose(&ConfigTemplate::parse("inline", template)?, overrides)
    }
}

fn object_mut<'a>(parent: &'a mut Map<String, Value>, key: &str) -> Result<&'a mut Map<String, Value>> {
    parent
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| FleetError::InvalidTemplate(format!("'{}' must be an object", key)))
}

fn apply_pairlist(config: &mut Map<String, Value>, pairlist: &Pairlist) -> Result<()> {
    let whitelist = Value::from(pairlist.pair_whitelist.clone());

    let exchange = object_mut(config, "exchange")?;
    exchange.insert("pair_whitelist".into(), whitelist.clone());
    if let Some(blacklist) = &pairlist.pair_blacklist {
        exchange.insert("pair_blacklist".into(), Value::from(blacklist.clone()));
    }

    let handlers = config
        .entry("pairlists")
        .or_insert_with(|| Value::Array(Vec::new()));
    let handlers = handlers
        .as_array_mut()
        .ok_or_else(|| FleetError::InvalidTemplate("'pairlists' must be an array".into()))?;
    handlers.retain(|h| h.get("method").and_then(Value::as_str) != Some(STATIC_PAIRLIST));
    handlers.insert(0, serde_json::json!({ "method": STATIC_PAIRLIST }));

    let freqai_enabled = config
        .get("freqai")
        .and_then(|f| f.get("enabled"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if freqai_enabled {
        let freqai = object_mut(config, "freqai")?;
        object_mut(freqai, "feature_parameters")?
            .insert("include_corr_pairlist".into(), whitelist);
    }
    Ok(())
}

/// Give an enabled API server its own secrets when the template has none
fn fill_api_secrets(config: &mut Map<String, Value>) {
    let Some(Value::Object(api)) = config.get_mut("api_server") else {
        return;
    };
    if api.get("enabled").and_then(Value::as_bool) != Some(true) {
        return;
    }
    for key in ["jwt_secret_key", "ws_token"] {
        let missing = match api.get(key) {
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
            None => true,
        };
        if missing {
            api.insert(key.into(), Value::from(uuid::Uuid::new_v4().simple().to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"{
        "max_open_trades": 5,
        "stake_currency": "USDT",
        "timeframe": "5m",
        "dry_run": true,
        "strategy": "SampleStrategy",
        "exchange": {"name": "binance", "pair_whitelist": ["ADA/USDT"]},
        "pairlists": [{"method": "VolumePairList", "number_assets": 20}],
        "freqai": {"enabled": true, "feature_parameters": {}}
    }"#;

    fn template() -> ConfigTemplate {
        ConfigTemplate::parse("base.json", TEMPLATE).unwrap()
    }

    #[test]
    fn test_compose_applies_overrides() {
        let pairlist = Pairlist::parse(r#"{"pair_whitelist": ["BTC/USDT", "ETH/USDT"]}"#).unwrap();
        let overrides = ConfigOverrides::default()
            .strategy("ichiV1")
            .pairlist(pairlist)
            .api_port(8080)
            .identifier("bot1")
            .dry_run(false);

        let artifact = TemplateComposer::default()
            .compose(&template(), &overrides)
            .unwrap();

        assert_eq!(artifact.value()["strategy"], "ichiV1");
        assert_eq!(artifact.value()["bot_name"], "bot1");
        assert_eq!(artifact.value()["dry_run"], false);
        assert_eq!(artifact.value()["api_server"]["listen_port"], 8080);
        assert_eq!(artifact.value()["api_server"]["enabled"], true);
        assert_eq!(artifact.value()["exchange"]["pair_whitelist"][1], "ETH/USDT");
        assert_eq!(artifact.value()["pairlists"][0]["method"], "StaticPairList");
        assert_eq!(artifact.value()["pairlists"][1]["method"], "VolumePairList");
        assert_eq!(
            artifact.value()["freqai"]["feature_parameters"]["include_corr_pairlist"][0],
            "BTC/USDT"
        );
        assert_eq!(artifact.value()["freqai"]["identifier"], "freqai_bot1");
        assert!(artifact.value()["api_server"]["jwt_secret_key"].is_string());
    }

    #[test]
    fn test_template_not_mutated() {
        let template = template();
        let before = template.value().clone();
        let composer = TemplateComposer::default();
        composer
            .compose(&template, &ConfigOverrides::default().strategy("A"))
            .unwrap();
        composer
            .compose(&template, &ConfigOverrides::default().strategy("B"))
            .unwrap();
        assert_eq!(template.value(), &before);
    }

    #[test]
    fn test_empty_overrides_keep_content() {
        let artifact = TemplateComposer::default()
            .compose(&template(), &ConfigOverrides::default())
            .unwrap();
        assert_eq!(artifact.value(), template().value());
    }

    #[test]
    fn test_unknown_override_keys_ignored() {
        let overrides =
            ConfigOverrides::from_json(r#"{"strategyName": "GodStra", "leverage": 10}"#).unwrap();
        assert_eq!(overrides.strategy_name.as_deref(), Some("GodStra"));
        assert_eq!(overrides.api_port, None);
    }

    #[test]
    fn test_invalid_template() {
        let composer = TemplateComposer::default();
        assert!(matches!(
            composer.compose_str("{ not json", &ConfigOverrides::default()),
            Err(FleetError::InvalidTemplate(_))
        ));
        assert!(matches!(
            composer.compose_str("[1, 2]", &ConfigOverrides::default()),
            Err(FleetError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_missing_required_field() {
        let err = TemplateComposer::default()
            .compose_str(r#"{"exchange": {}}"#, &ConfigOverrides::default())
            .unwrap_err();
        assert!(matches!(err, FleetError::MissingRequiredField(f) if f == "timeframe"));
    }

    #[test]
    fn test_find_template_search_order() {
        let temp = tempfile::tempdir().unwrap();
        let configs = temp.path().join("configs");
        let user_data = temp.path().join("user_data");
        std::fs::create_dir_all(&configs).unwrap();
        std::fs::create_dir_all(&user_data).unwrap();
        std::fs::write(user_data.join("base.json"), TEMPLATE).unwrap();

        let composer = TemplateComposer::new(vec![configs.clone(), user_data.clone()]);
        assert_eq!(composer.find_template("base.json"), Some(user_data.join("base.json")));

        std::fs::write(configs.join("base.json"), TEMPLATE).unwrap();
        assert_eq!(composer.find_template("base.json"), Some(configs.join("base.json")));
        assert!(composer.load_template("missing.json").is_err());
    }

    #[test]
    fn test_write_uses_four_space_indent() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("configs").join("config_bot1.json");
        let artifact = TemplateComposer::default()
            .compose(&template(), &ConfigOverrides::default())
            .unwrap();
        artifact.write(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\n    \"max_open_trades\": 5"));
        let reread: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(&reread, artifact.value());
    }
}
