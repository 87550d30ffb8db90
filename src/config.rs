//! Destination configuration and configuration sources.
//!
//! # YAML Format
//!
//! ```yaml
//! destinations:
//!   analytics:
//!     workspaceId: acme
//!     batchSize: 10000
//!     bulkerType: postgres
//!     destinationConfig:
//!       host: localhost
//!       database: analytics
//!       username: bulker
//!       password: secret
//!     streamConfig:
//!       primaryKey: [id]
//!       mergeRows: true
//!       defaultTypes:
//!         created_at: timestamp
//!       sqlTypes:
//!         payload: jsonb
//! ```
//!
//! Destinations are keyed by their id. An entry that does not decode is
//! logged and skipped; the remaining destinations still load.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use bulk_core::{DefaultTypes, SqlTypeHints, StreamOptions};
use serde::{Deserialize, Serialize};

const DESTINATIONS_KEY: &str = "destinations";

/// Stream defaults of a destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub merge_rows: bool,
    #[serde(default)]
    pub default_types: DefaultTypes,
    #[serde(default)]
    pub sql_types: SqlTypeHints,
    #[serde(default)]
    pub column_widening: bool,
}

impl StreamConfig {
    pub fn stream_options(&self) -> StreamOptions {
        let mut options = StreamOptions::new().with_primary_key(self.primary_key.iter().cloned());
        options.merge_rows = self.merge_rows;
        options.default_types = self.default_types.clone();
        options.sql_types = self.sql_types.clone();
        options.column_widening = self.column_widening;
        options
    }
}

/// What a backend constructor receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkerConfig {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "type")]
    pub bulker_type: String,
    /// Backend-specific connection blob, decoded by the backend.
    #[serde(default, alias = "credentials")]
    pub destination_config: serde_json::Value,
    #[serde(default)]
    pub stream_config: StreamConfig,
}

impl BulkerConfig {
    pub fn new(id: impl Into<String>, bulker_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bulker_type: bulker_type.into(),
            destination_config: serde_json::Value::Null,
            stream_config: StreamConfig::default(),
        }
    }

    pub fn with_destination_config(mut self, value: serde_json::Value) -> Self {
        self.destination_config = value;
        self
    }

    pub fn with_stream_config(mut self, stream_config: StreamConfig) -> Self {
        self.stream_config = stream_config;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestinationConfig {
    pub workspace_id: String,
    /// Rows per commit unit for callers that chunk their input.
    pub batch_size: usize,
    pub config: BulkerConfig,
}

impl DestinationConfig {
    /// Destination identity, unique across workspaces.
    pub fn id(&self) -> String {
        format!("{}_{}", self.workspace_id, self.config.id)
    }
}

/// One `destinations` entry as written in the file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DestinationEntry {
    #[serde(default)]
    workspace_id: String,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(alias = "type")]
    bulker_type: String,
    #[serde(default, alias = "credentials")]
    destination_config: serde_json::Value,
    #[serde(default)]
    stream_config: StreamConfig,
}

fn default_batch_size() -> usize {
    10_000
}

/// Source of destination configurations.
pub trait ConfigurationSource: Send + Sync {
    fn destination_configs(&self) -> Vec<&DestinationConfig>;

    fn destination_config(&self, id: &str) -> Option<&DestinationConfig>;

    /// Any top-level value of the configuration.
    fn value(&self, key: &str) -> Option<&serde_json::Value>;

    /// The whole configuration document.
    fn raw(&self) -> &serde_json::Value;

    /// True when both sources hold the same configuration, so a reload can
    /// be skipped.
    fn equals(&self, other: &dyn ConfigurationSource) -> bool {
        self.raw() == other.raw()
    }
}

/// Configuration held in one YAML document.
#[derive(Debug, Clone)]
pub struct YamlConfigurationSource {
    raw: serde_json::Value,
    destinations: BTreeMap<String, DestinationConfig>,
}

impl YamlConfigurationSource {
    /// Open a source from `file://<path>` or a plain path.
    pub fn from_uri(uri: &str) -> anyhow::Result<Self> {
        if uri.trim().is_empty() {
            anyhow::bail!("configuration source is required (set BULKLOAD_CONFIG_SOURCE)");
        }
        let path = match uri.strip_prefix("file://") {
            Some(path) => path,
            None if !uri.contains("://") => uri,
            None => anyhow::bail!("unsupported configuration source: {uri}"),
        };
        Self::from_file(path)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read yaml config file: {}", path.display()))?;
        Self::from_yaml(&text)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let raw: serde_json::Value = if text.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_yaml::from_str(text).context("Failed to parse yaml configuration")?
        };

        let mut destinations = BTreeMap::new();
        match raw.get(DESTINATIONS_KEY) {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::Object(entries)) => {
                for (id, entry) in entries {
                    match serde_json::from_value::<DestinationEntry>(entry.clone()) {
                        Ok(entry) => {
                            let config = BulkerConfig {
                                id: id.clone(),
                                bulker_type: entry.bulker_type,
                                destination_config: entry.destination_config,
                                stream_config: entry.stream_config,
                            };
                            destinations.insert(
                                id.clone(),
                                DestinationConfig {
                                    workspace_id: entry.workspace_id,
                                    batch_size: entry.batch_size,
                                    config,
                                },
                            );
                        }
                        Err(e) => {
                            tracing::error!("Failed to parse destination config {id}: {e}");
                        }
                    }
                }
            }
            Some(other) => anyhow::bail!(
                "failed to parse destinations: expected a mapping, got {other}"
            ),
        }

        tracing::debug!("Loaded {} destination configs", destinations.len());
        Ok(Self { raw, destinations })
    }
}

impl ConfigurationSource for YamlConfigurationSource {
    fn destination_configs(&self) -> Vec<&DestinationConfig> {
        self.destinations.values().collect()
    }

    fn destination_config(&self, id: &str) -> Option<&DestinationConfig> {
        self.destinations.get(id)
    }

    fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.raw.get(key)
    }

    fn raw(&self) -> &serde_json::Value {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulk_core::LogicalType;
    use std::io::Write;

    const YAML: &str = r#"
logLevel: debug
destinations:
  pg:
    workspaceId: acme
    batchSize: 500
    bulkerType: postgres
    destinationConfig:
      host: localhost
      port: 5433
      database: analytics
      username: bulker
    streamConfig:
      primaryKey: [id]
      mergeRows: true
      defaultTypes:
        created_at: timestamp
      sqlTypes:
        payload: jsonb
  files:
    workspaceId: acme
    type: file
    credentials:
      path: /tmp/bulkload
  broken:
    workspaceId: acme
    batchSize: not-a-number
    bulkerType: memory
"#;

    #[test]
    fn test_parse_destinations_skips_broken() {
        let source = YamlConfigurationSource::from_yaml(YAML).unwrap();
        let ids: Vec<_> = source
            .destination_configs()
            .iter()
            .map(|d| d.config.id.clone())
            .collect();
        assert_eq!(ids, vec!["files".to_string(), "pg".to_string()]);
        assert!(source.destination_config("broken").is_none());
    }

    #[test]
    fn test_destination_fields() {
        let source = YamlConfigurationSource::from_yaml(YAML).unwrap();
        let pg = source.destination_config("pg").unwrap();
        assert_eq!(pg.id(), "acme_pg");
        assert_eq!(pg.batch_size, 500);
        assert_eq!(pg.config.bulker_type, "postgres");
        assert_eq!(pg.config.destination_config["port"], serde_json::json!(5433));

        let options = pg.config.stream_config.stream_options();
        assert!(options.merge_rows);
        assert!(options.primary_key.contains("id"));
        assert_eq!(options.default_types.get("created_at"), Some(&LogicalType::Timestamp));
        assert_eq!(options.sql_types.get("payload").map(String::as_str), Some("jsonb"));

        let files = source.destination_config("files").unwrap();
        assert_eq!(files.batch_size, 10_000);
        assert_eq!(files.config.bulker_type, "file");
        assert_eq!(files.config.destination_config["path"], "/tmp/bulkload");
    }

    #[test]
    fn test_value_and_equals() {
        let a = YamlConfigurationSource::from_yaml(YAML).unwrap();
        let b = YamlConfigurationSource::from_yaml(YAML).unwrap();
        let c = YamlConfigurationSource::from_yaml("destinations: {}").unwrap();

        assert_eq!(a.value("logLevel"), Some(&serde_json::json!("debug")));
        assert!(a.value("missing").is_none());
        assert!(a.equals(&b));
        assert!(!a.equals(&c));
    }

    #[test]
    fn test_from_uri() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let plain = YamlConfigurationSource::from_uri(&path).unwrap();
        let uri = YamlConfigurationSource::from_uri(&format!("file://{path}")).unwrap();
        assert!(plain.equals(&uri));

        assert!(YamlConfigurationSource::from_uri("").is_err());
        assert!(YamlConfigurationSource::from_uri("redis://localhost").is_err());
        assert!(YamlConfigurationSource::from_uri("/nonexistent/bulkload.yaml").is_err());
    }

    #[test]
    fn test_destinations_must_be_mapping() {
        assert!(YamlConfigurationSource::from_yaml("destinations: [a, b]").is_err());
        assert!(YamlConfigurationSource::from_yaml("")
            .unwrap()
            .destination_configs()
            .is_empty());
    }
}
