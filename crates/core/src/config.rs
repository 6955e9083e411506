//! Configuration for rowbridge.
//!
//! Loaded from TOML. Besides the bridge settings a file may carry the three
//! option sections of a scan: `[server]`, `[user_mapping]` and `[table]`.

use crate::error::{BridgeError, Result};
use crate::options::ScanOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_NULL_MARKER: &str = "\\N";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Applied when a request asks for timeout 0 or none at all.
    #[serde(default = "default_query_timeout_secs")]
    pub default_query_timeout_secs: u64,

    /// Printed in place of SQL NULL by text renderers.
    #[serde(default = "default_null_marker")]
    pub null_marker: String,

    #[serde(default)]
    pub server: BTreeMap<String, toml::Value>,

    #[serde(default)]
    pub user_mapping: BTreeMap<String, toml::Value>,

    #[serde(default)]
    pub table: BTreeMap<String, toml::Value>,
}

fn default_query_timeout_secs() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

fn default_null_marker() -> String {
    DEFAULT_NULL_MARKER.to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_query_timeout_secs: default_query_timeout_secs(),
            null_marker: default_null_marker(),
            server: BTreeMap::new(),
            user_mapping: BTreeMap::new(),
            table: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| BridgeError::invalid_options(format!("invalid config: {e}")))
    }

    /// Loads configuration from `path`, which must exist.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(BridgeError::invalid_options(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::invalid_options(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// A configured 0 falls back to [`DEFAULT_QUERY_TIMEOUT_SECS`].
    pub fn default_query_timeout(&self) -> Duration {
        match self.default_query_timeout_secs {
            0 => Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    pub fn set_default_query_timeout(mut self, secs: u64) -> Self {
        self.default_query_timeout_secs = secs;
        self
    }

    pub fn set_null_marker(mut self, marker: impl Into<String>) -> Self {
        self.null_marker = marker.into();
        self
    }

    /// Merge the option sections with `overrides` (which win) and validate them.
    pub fn scan_options(&self, overrides: &ScanOverrides) -> Result<ScanOptions> {
        let server = merge(&self.server, &overrides.server);
        let user_mapping = merge(&self.user_mapping, &overrides.user_mapping);
        let mut table = merge(&self.table, &overrides.table);
        // an explicit query or table replaces whichever one the file names
        if overrides.table_has("query") {
            table.retain(|(k, _)| k != "table");
        } else if overrides.table_has("table") {
            table.retain(|(k, _)| k != "query");
        }
        ScanOptions::from_contexts(&server, &user_mapping, &table)
    }
}

/// Option values given outside the config file, per context.
#[derive(Debug, Clone, Default)]
pub struct ScanOverrides {
    pub server: Vec<(String, String)>,
    pub user_mapping: Vec<(String, String)>,
    pub table: Vec<(String, String)>,
}

impl ScanOverrides {
    fn table_has(&self, key: &str) -> bool {
        self.table.iter().any(|(k, _)| k == key)
    }
}

fn value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn merge(file: &BTreeMap<String, toml::Value>, overrides: &[(String, String)]) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = file
        .iter()
        .filter(|(k, _)| !overrides.iter().any(|(o, _)| o == *k))
        .map(|(k, v)| (k.clone(), value_to_string(v)))
        .collect();
    out.extend(overrides.iter().cloned());
    out
}
