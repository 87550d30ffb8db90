//! PostgreSQL destination configuration.

use std::collections::BTreeMap;

use bulk_core::{BulkError, Result};
use serde::{Deserialize, Serialize};

/// Connection parameters passed through to the driver.
const PASSTHROUGH_PARAMETERS: [&str; 6] = [
    "sslmode",
    "connect_timeout",
    "application_name",
    "keepalives",
    "keepalives_idle",
    "options",
];

/// Connection settings of a PostgreSQL destination.
///
/// # YAML Format
///
/// ```yaml
/// host: localhost
/// port: 5432
/// database: analytics
/// username: bulker
/// password: secret
/// schema: events
/// parameters:
///   sslmode: disable
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(alias = "db")]
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

fn default_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

impl PostgresConfig {
    /// Decode from the opaque destination blob and validate.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: PostgresConfig = serde_json::from_value(value)
            .map_err(|e| BulkError::config(format!("invalid postgres config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("host", &self.host),
            ("database", &self.database),
            ("username", &self.username),
            ("schema", &self.schema),
        ] {
            if value.trim().is_empty() {
                return Err(BulkError::config(format!("postgres: {name} is required")));
            }
        }
        for (key, value) in &self.parameters {
            if !PASSTHROUGH_PARAMETERS.contains(&key.as_str()) {
                return Err(BulkError::config(format!(
                    "postgres: unsupported connection parameter '{key}'"
                )));
            }
            if key == "sslmode" && !matches!(value.as_str(), "disable" | "allow" | "prefer") {
                return Err(BulkError::config(format!(
                    "postgres: sslmode '{value}' requires TLS, which is not supported"
                )));
            }
        }
        Ok(())
    }

    /// Key/value connection string for `tokio_postgres::connect`.
    pub fn connection_string(&self) -> String {
        let mut parts = vec![
            format!("host={}", quote(&self.host)),
            format!("port={}", self.port),
            format!("dbname={}", quote(&self.database)),
            format!("user={}", quote(&self.username)),
        ];
        if !self.password.is_empty() {
            parts.push(format!("password={}", quote(&self.password)));
        }
        for (key, value) in &self.parameters {
            // The driver knows no "allow"; it degrades to "prefer" anyway
            let value = if key == "sslmode" && value == "allow" {
                "prefer"
            } else {
                value.as_str()
            };
            parts.push(format!("{key}={}", quote(value)));
        }
        parts.join(" ")
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> PostgresConfig {
        PostgresConfig::from_value(json!({
            "host": "localhost",
            "database": "test",
            "username": "postgres",
            "password": "it's secret",
            "parameters": {"sslmode": "disable"}
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.port, 5432);
        assert_eq!(config.schema, "public");
    }

    #[test]
    fn test_connection_string_quotes_values() {
        assert_eq!(
            config().connection_string(),
            "host='localhost' port=5432 dbname='test' user='postgres' password='it\\'s secret' sslmode='disable'"
        );
    }

    #[test]
    fn test_db_alias() {
        let config = PostgresConfig::from_value(json!({
            "host": "h", "db": "d", "username": "u"
        }))
        .unwrap();
        assert_eq!(config.database, "d");
    }

    #[test]
    fn test_validation_errors() {
        let missing_host = json!({"host": "", "database": "d", "username": "u"});
        assert!(matches!(
            PostgresConfig::from_value(missing_host),
            Err(BulkError::Config(_))
        ));

        let tls = json!({
            "host": "h", "database": "d", "username": "u",
            "parameters": {"sslmode": "verify-full"}
        });
        let err = PostgresConfig::from_value(tls).unwrap_err();
        assert!(err.to_string().contains("requires TLS"));

        let unknown = json!({
            "host": "h", "database": "d", "username": "u",
            "parameters": {"search_path": "x"}
        });
        assert!(PostgresConfig::from_value(unknown).is_err());

        assert!(PostgresConfig::from_value(json!({"host": "h"})).is_err());
    }
}
