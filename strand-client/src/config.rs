//! Typed client configuration
//!
//! [`ClientConfig`] collects properties as typed values and renders them to
//! the string form the engine accepts. Properties are only checked against
//! the engine when a store is created from them, so a config can be built
//! or loaded long before an engine exists.
//!
//! Keys prefixed `strand.` are interpreted by the client and never reach the
//! engine.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strand_core::{ConfKind, ConfigStore, Engine};

use crate::error::{ClientError, Result};

/// Prefix of properties handled by the client itself
pub const CLIENT_PREFIX: &str = "strand.";

/// File-level prefix routing a property to the default topic configuration
const TOPIC_PREFIX: &str = "topic.";

const ENABLE_TIMESTAMPS: &str = "strand.consumer.enable.timestamps";
const ENABLE_HEADERS: &str = "strand.consumer.enable.headers";

/// A property value before rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ConfigValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for ConfigValue {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<u32> for ConfigValue {
    fn from(n: u32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for ConfigValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

/// What to do when there is no valid committed offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoOffsetReset {
    Earliest,
    Latest,
    /// Report `OffsetOutOfRange` on the consume path instead
    Error,
}

impl AutoOffsetReset {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
            Self::Error => "error",
        }
    }
}

/// Group partition assignment strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStrategy {
    Range,
    RoundRobin,
}

impl AssignmentStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Range => "range",
            Self::RoundRobin => "roundrobin",
        }
    }
}

/// Options read from `strand.*` properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Records carry their timestamp
    pub enable_timestamps: bool,
    /// Records carry their headers
    pub enable_headers: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            enable_timestamps: true,
            enable_headers: true,
        }
    }
}

/// Client and default-topic properties
///
/// # Example
///
/// ```text
/// let config = ClientConfig::new()
///     .group_id("billing")
///     .bootstrap_servers("broker:9092")
///     .auto_offset_reset(AutoOffsetReset::Earliest)
///     .set("fetch.wait.max.ms", 10);
/// let consumer = Consumer::new(engine, &config)?;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    entries: BTreeMap<String, ConfigValue>,
    topic_entries: BTreeMap<String, ConfigValue>,
}

impl ClientConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set any client property by name.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Set a property of the default topic configuration.
    #[must_use]
    pub fn topic_config(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.topic_entries.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn group_id(self, group_id: impl Into<String>) -> Self {
        self.set("group.id", ConfigValue::Str(group_id.into()))
    }

    #[must_use]
    pub fn bootstrap_servers(self, servers: impl Into<String>) -> Self {
        self.set("bootstrap.servers", ConfigValue::Str(servers.into()))
    }

    #[must_use]
    pub fn client_id(self, client_id: impl Into<String>) -> Self {
        self.set("client.id", ConfigValue::Str(client_id.into()))
    }

    #[must_use]
    pub fn session_timeout(self, timeout: Duration) -> Self {
        let ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        self.set("session.timeout.ms", ms)
    }

    #[must_use]
    pub fn enable_partition_eof(self, enabled: bool) -> Self {
        self.set("enable.partition.eof", enabled)
    }

    #[must_use]
    pub fn enable_auto_commit(self, enabled: bool) -> Self {
        self.set("enable.auto.commit", enabled)
    }

    #[must_use]
    pub fn auto_offset_reset(self, reset: AutoOffsetReset) -> Self {
        self.topic_config("auto.offset.reset", reset.as_str())
    }

    #[must_use]
    pub fn partition_assignment_strategy(self, strategy: AssignmentStrategy) -> Self {
        self.set("partition.assignment.strategy", strategy.as_str())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn get_topic(&self, key: &str) -> Option<&ConfigValue> {
        self.topic_entries.get(key)
    }

    /// Remove a client property, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.entries.remove(key)
    }

    /// Client properties in key order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Load properties from a TOML or JSON file.
    ///
    /// Nested tables flatten to dotted keys, so `[group] id = "g"` and
    /// `"group.id" = "g"` are equivalent. Keys under `topic.` go to the
    /// default topic configuration.
    ///
    /// # Errors
    /// `IoError` if unreadable, `Config` for parse errors, non-scalar
    /// values or an unknown extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let root: BTreeMap<String, FileValue> = match ext {
            "toml" => toml::from_str(&content)
                .map_err(|e| ClientError::Config(format!("TOML parse error: {e}")))?,
            "json" => serde_json::from_str(&content)
                .map_err(|e| ClientError::Config(format!("JSON parse error: {e}")))?,
            _ => {
                return Err(ClientError::Config(format!(
                    "Unknown config file extension: {ext}"
                )));
            },
        };

        let mut flat = Vec::new();
        for (key, value) in root {
            value.flatten(key, &mut flat);
        }

        let mut config = Self::new();
        for (key, value) in flat {
            match key.strip_prefix(TOPIC_PREFIX) {
                Some(topic_key) => {
                    config.topic_entries.insert(topic_key.to_string(), value);
                },
                None => {
                    config.entries.insert(key, value);
                },
            }
        }
        tracing::debug!(
            path = %path.display(),
            properties = config.entries.len() + config.topic_entries.len(),
            "client configuration loaded"
        );
        Ok(config)
    }

    /// Interpret the `strand.*` properties.
    ///
    /// # Errors
    /// `Config` for an unknown `strand.` key or a non-boolean value.
    pub fn client_options(&self) -> Result<ClientOptions> {
        let mut options = ClientOptions::default();
        for (key, value) in self
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(CLIENT_PREFIX))
        {
            let flag = parse_flag(key, value)?;
            match key.as_str() {
                ENABLE_TIMESTAMPS => options.enable_timestamps = flag,
                ENABLE_HEADERS => options.enable_headers = flag,
                _ => {
                    return Err(ClientError::Config(format!(
                        "Unknown client property \"{key}\""
                    )));
                },
            }
        }
        Ok(options)
    }

    /// Apply every engine property to a fresh client configuration store,
    /// with topic properties in a default topic store.
    ///
    /// The default topic store is installed first. Topic-scope keys given
    /// through [`ClientConfig::set`] are forwarded into it afterwards and
    /// win over the same key given through [`ClientConfig::topic_config`].
    ///
    /// # Errors
    /// `InvalidProperty` / `UnknownProperty` naming the first rejected key,
    /// `CreationFailed` if the engine cannot allocate a store.
    pub fn create_store(&self, engine: Arc<dyn Engine>) -> Result<ConfigStore> {
        let store = ConfigStore::new(engine.clone(), ConfKind::Global)?;

        if !self.topic_entries.is_empty() {
            let topic = ConfigStore::new(engine, ConfKind::Topic)?;
            for (key, value) in &self.topic_entries {
                topic.set(key, &value.to_string())?;
            }
            store.set_default_topic_config(topic)?;
        }

        for (key, value) in self.engine_entries() {
            store.set(key, &value.to_string())?;
        }

        tracing::debug!(
            properties = self.entries.len(),
            topic_properties = self.topic_entries.len(),
            "configuration store created"
        );
        Ok(store)
    }

    fn engine_entries(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.entries
            .iter()
            .filter(|(k, _)| !k.starts_with(CLIENT_PREFIX))
    }
}

fn parse_flag(key: &str, value: &ConfigValue) -> Result<bool> {
    match value {
        ConfigValue::Bool(b) => Ok(*b),
        ConfigValue::Str(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        ConfigValue::Str(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(ClientError::Config(format!(
            "Expected bool value for \"{key}\", got \"{other}\""
        ))),
    }
}

/// Raw file contents: scalars or nested tables.
#[derive(Deserialize)]
#[serde(untagged)]
enum FileValue {
    Scalar(ConfigValue),
    Table(BTreeMap<String, FileValue>),
}

impl FileValue {
    fn flatten(self, prefix: String, out: &mut Vec<(String, ConfigValue)>) {
        match self {
            Self::Scalar(value) => out.push((prefix, value)),
            Self::Table(table) => {
                for (key, value) in table {
                    value.flatten(format!("{prefix}.{key}"), out);
                }
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_values_render_as_engine_strings() {
        assert_eq!(ConfigValue::from(true).to_string(), "true");
        assert_eq!(ConfigValue::from(45_000_i64).to_string(), "45000");
        assert_eq!(ConfigValue::from("range").to_string(), "range");
        assert_eq!(ConfigValue::from(0.5).to_string(), "0.5");
    }

    #[test]
    fn test_typed_helpers() {
        let config = ClientConfig::new()
            .group_id("g")
            .session_timeout(Duration::from_secs(6))
            .enable_partition_eof(false)
            .auto_offset_reset(AutoOffsetReset::Earliest)
            .partition_assignment_strategy(AssignmentStrategy::RoundRobin);

        assert_eq!(config.get("group.id"), Some(&ConfigValue::from("g")));
        assert_eq!(config.get("session.timeout.ms"), Some(&ConfigValue::Int(6000)));
        assert_eq!(config.get("enable.partition.eof"), Some(&ConfigValue::Bool(false)));
        assert_eq!(
            config.get("partition.assignment.strategy"),
            Some(&ConfigValue::from("roundrobin"))
        );
        assert_eq!(
            config.get_topic("auto.offset.reset"),
            Some(&ConfigValue::from("earliest"))
        );
        assert!(config.get("auto.offset.reset").is_none());
    }

    #[test]
    fn test_store_keeps_topic_keys_from_both_tables() {
        let engine: Arc<dyn Engine> = Arc::new(strand_engine::MemoryEngine::new());

        let config = ClientConfig::new()
            .set("auto.offset.reset", "earliest")
            .topic_config("message.timeout.ms", 1000);
        let store = config.create_store(engine.clone()).unwrap();
        assert_eq!(store.get("auto.offset.reset").unwrap(), "earliest");
        assert_eq!(store.get("message.timeout.ms").unwrap(), "1000");

        let config = ClientConfig::new()
            .set("message.timeout.ms", 1000)
            .auto_offset_reset(AutoOffsetReset::Earliest);
        let store = config.create_store(engine.clone()).unwrap();
        assert_eq!(store.get("message.timeout.ms").unwrap(), "1000");
        assert_eq!(store.get("auto.offset.reset").unwrap(), "earliest");

        let config = ClientConfig::new()
            .topic_config("auto.offset.reset", "latest")
            .set("auto.offset.reset", "earliest");
        let store = config.create_store(engine).unwrap();
        assert_eq!(store.get("auto.offset.reset").unwrap(), "earliest");
    }

    #[test]
    fn test_client_options() {
        let config = ClientConfig::new();
        assert_eq!(config.client_options().unwrap(), ClientOptions::default());

        let config = ClientConfig::new()
            .set(ENABLE_TIMESTAMPS, false)
            .set(ENABLE_HEADERS, "FALSE");
        let options = config.client_options().unwrap();
        assert!(!options.enable_timestamps);
        assert!(!options.enable_headers);

        let bad = ClientConfig::new().set("strand.consumer.bogus", true);
        assert!(matches!(bad.client_options(), Err(ClientError::Config(_))));

        let bad = ClientConfig::new().set(ENABLE_HEADERS, 1_i64);
        assert!(matches!(bad.client_options(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_from_toml_flattens_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(
            &path,
            r#"
"bootstrap.servers" = "localhost:9092"
enable.partition.eof = false

[group]
id = "billing"

[session.timeout]
ms = 6000

[topic.auto.offset]
reset = "earliest"
"#,
        )
        .unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.get("group.id"), Some(&ConfigValue::from("billing")));
        assert_eq!(config.get("session.timeout.ms"), Some(&ConfigValue::Int(6000)));
        assert_eq!(config.get("enable.partition.eof"), Some(&ConfigValue::Bool(false)));
        assert_eq!(
            config.get("bootstrap.servers"),
            Some(&ConfigValue::from("localhost:9092"))
        );
        assert_eq!(
            config.get_topic("auto.offset.reset"),
            Some(&ConfigValue::from("earliest"))
        );
    }

    #[test]
    fn test_from_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, r#"{"group.id": "g", "fetch.wait.max.ms": 10}"#).unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.get("group.id"), Some(&ConfigValue::from("g")));
        assert_eq!(config.get("fetch.wait.max.ms"), Some(&ConfigValue::Int(10)));
    }

    #[test]
    fn test_unknown_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.yaml");
        std::fs::write(&path, "group.id: g").unwrap();
        assert!(matches!(ClientConfig::from_file(&path), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_non_scalar_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, r#"{"bootstrap.servers": ["a", "b"]}"#).unwrap();
        assert!(matches!(ClientConfig::from_file(&path), Err(ClientError::Config(_))));
    }
}
