//! Backend registry.
//!
//! Maps a backend type to the constructor that turns a [`BulkerConfig`] into
//! a connected [`Bulker`]. The registry is built once at startup from an
//! explicit list; nothing registers itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use bulk_core::{BulkError, Result};
use file_bulker::{FileStorage, LocalConfig, S3Config, LOCAL_STORE_TYPE, S3_STORE_TYPE};
use futures::future::{BoxFuture, FutureExt};
use postgresql_bulker::{PostgresAdapter, PostgresConfig, POSTGRES_BULKER_TYPE};
use sql_bulker::{MemoryAdapter, SqlAdapter, MEMORY_BULKER_TYPE};

use crate::bulker::{Backend, Bulker};
use crate::config::BulkerConfig;

/// Builds a connected destination from its config. Implementations
/// validate the config before any network I/O.
pub type Constructor = fn(BulkerConfig) -> BoxFuture<'static, Result<Bulker>>;

#[derive(Clone, Default)]
pub struct Registry {
    constructors: BTreeMap<String, Constructor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (name, constructor) in [
            (POSTGRES_BULKER_TYPE, postgres as Constructor),
            (MEMORY_BULKER_TYPE, memory as Constructor),
            (S3_STORE_TYPE, s3 as Constructor),
            (LOCAL_STORE_TYPE, local as Constructor),
        ] {
            registry.register(name, constructor);
        }
        registry
    }

    pub fn register(&mut self, bulker_type: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(bulker_type.into(), constructor);
    }

    pub fn bulker_types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn is_registered(&self, bulker_type: &str) -> bool {
        self.constructors.contains_key(bulker_type)
    }

    pub async fn create(&self, config: BulkerConfig) -> Result<Bulker> {
        let constructor = self
            .constructors
            .get(&config.bulker_type)
            .ok_or_else(|| BulkError::UnknownBackend(config.bulker_type.clone()))?;
        let id = config.id.clone();
        let bulker_type = config.bulker_type.clone();
        let bulker = constructor(config).await?;
        tracing::info!("Created {bulker_type} destination '{id}'");
        Ok(bulker)
    }
}

fn postgres(config: BulkerConfig) -> BoxFuture<'static, Result<Bulker>> {
    async move {
        let pg_config = PostgresConfig::from_value(config.destination_config)?;
        let adapter = PostgresAdapter::connect(pg_config).await?;
        adapter.init_database().await?;
        Ok(Bulker::new(
            config.id,
            POSTGRES_BULKER_TYPE,
            Backend::Sql(Arc::new(adapter)),
            config.stream_config.stream_options(),
        ))
    }
    .boxed()
}

fn memory(config: BulkerConfig) -> BoxFuture<'static, Result<Bulker>> {
    async move {
        if !matches!(
            config.destination_config,
            serde_json::Value::Null | serde_json::Value::Object(_)
        ) {
            return Err(BulkError::config(
                "memory: destination config must be empty or a mapping",
            ));
        }
        Ok(Bulker::new(
            config.id,
            MEMORY_BULKER_TYPE,
            Backend::Sql(Arc::new(MemoryAdapter::new())),
            config.stream_config.stream_options(),
        ))
    }
    .boxed()
}

fn s3(config: BulkerConfig) -> BoxFuture<'static, Result<Bulker>> {
    async move {
        let s3_config = S3Config::from_value(config.destination_config)?;
        let storage = FileStorage::connect_s3(s3_config).await?;
        Ok(Bulker::new(
            config.id,
            S3_STORE_TYPE,
            Backend::Files(Arc::new(storage)),
            config.stream_config.stream_options(),
        ))
    }
    .boxed()
}

fn local(config: BulkerConfig) -> BoxFuture<'static, Result<Bulker>> {
    async move {
        let local_config = LocalConfig::from_value(config.destination_config)?;
        let storage = FileStorage::local(local_config)?;
        storage.validate_write_permission().await?;
        Ok(Bulker::new(
            config.id,
            LOCAL_STORE_TYPE,
            Backend::Files(Arc::new(storage)),
            config.stream_config.stream_options(),
        ))
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_types() {
        assert_eq!(
            Registry::with_defaults().bulker_types(),
            vec!["file", "memory", "postgres", "s3"]
        );
        assert!(Registry::new().bulker_types().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_backend_is_distinct_from_config_error() {
        let registry = Registry::with_defaults();

        let unknown = registry.create(BulkerConfig::new("d", "clickhouse")).await;
        assert!(matches!(unknown, Err(BulkError::UnknownBackend(t)) if t == "clickhouse"));

        let misconfigured = registry
            .create(BulkerConfig::new("d", "postgres").with_destination_config(json!({"host": ""})))
            .await;
        assert!(matches!(misconfigured, Err(BulkError::Config(_))));

        let bad_s3 = registry
            .create(BulkerConfig::new("d", "s3").with_destination_config(json!({"bucket": ""})))
            .await;
        assert!(matches!(bad_s3, Err(BulkError::Config(_))));
    }

    #[tokio::test]
    async fn test_create_memory_and_local() {
        let registry = Registry::with_defaults();
        let memory = registry.create(BulkerConfig::new("m", "memory")).await.unwrap();
        assert_eq!(memory.bulker_type(), "memory");
        assert!(memory.sql_adapter().is_some());

        let dir = tempfile::TempDir::new().unwrap();
        let files = registry
            .create(
                BulkerConfig::new("f", "file")
                    .with_destination_config(json!({"path": dir.path().to_str().unwrap()})),
            )
            .await
            .unwrap();
        assert!(files.file_storage().is_some());
        assert_eq!(files.id(), "f");
    }

    #[tokio::test]
    async fn test_register_custom_constructor() {
        let mut registry = Registry::new();
        registry.register("scratch", memory);
        assert!(registry.is_registered("scratch"));
        let bulker = registry.create(BulkerConfig::new("x", "scratch")).await.unwrap();
        assert_eq!(bulker.id(), "x");
    }
}
