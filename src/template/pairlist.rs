//! Pairlist files

use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pair white/blacklist loaded from a pairlist file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pairlist {
    /// File name the list was loaded from
    #[serde(skip)]
    pub source: String,
    pub pair_whitelist: Vec<String>,
    #[serde(default)]
    pub pair_blacklist: Option<Vec<String>>,
}

impl Pairlist {
    /// Load a pairlist JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut list = Self::parse(&content)?;
        list.source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(list)
    }

    /// Parse pairlist JSON
    pub fn parse(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| FleetError::InvalidTemplate(format!("pairlist is not valid JSON: {}", e)))?;
        if value.get("pair_whitelist").is_none() {
            return Err(FleetError::MissingRequiredField("pair_whitelist".to_string()));
        }
        serde_json::from_value(value)
            .map_err(|e| FleetError::InvalidTemplate(format!("malformed pairlist: {}", e)))
    }
}
