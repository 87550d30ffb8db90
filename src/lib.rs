//! bulkload
//!
//! A bulk-data loading engine: records stream into a destination table while
//! field types are resolved on the fly and the destination schema is
//! reconciled without losing existing data.
//!
//! # Crates
//!
//! - `bulk_core` - logical types, records, type resolver, schema reconciler,
//!   stream protocol and errors
//! - `sql_bulker` - SQL adapter trait, SQL stream engine, in-memory backend
//! - `postgresql_bulker` - PostgreSQL backend
//! - `file_bulker` - object-storage backends (S3, local directory)
//!
//! # Bulk Modes
//!
//! - `autocommit` - every record is written right away
//! - `transactional` - the batch is written atomically at complete
//! - `replace_table` - the batch atomically replaces the table contents
//! - `replace_partition` - the batch atomically replaces one partition
//!
//! # Example
//!
//! ```ignore
//! let source = YamlConfigurationSource::from_uri("file://bulkload.yaml")?;
//! let destination = source.destination_config("analytics").unwrap();
//! let bulker = Registry::with_defaults().create(destination.config.clone()).await?;
//!
//! let mut stream = bulker.create_stream("s1", "events", BulkMode::Transactional, StreamOptions::new())?;
//! stream.consume(Record::from_json_str(r#"{"id": 1, "name": "test"}"#)?).await?;
//! let state = stream.complete().await?;
//! ```

pub mod bulker;
pub mod config;
pub mod registry;

pub use bulker::{Backend, Bulker};
pub use config::{
    BulkerConfig, ConfigurationSource, DestinationConfig, StreamConfig, YamlConfigurationSource,
};
pub use registry::{Constructor, Registry};

// Re-export member crates for convenience
pub use bulk_core;
pub use file_bulker;
pub use postgresql_bulker;
pub use sql_bulker;

pub use bulk_core::{
    BulkError, BulkMode, BulkerStream, LogicalType, Record, State, Status, StreamOptions, Value,
};
