//! Core model of the bulkload engine.
//!
//! Backend crates build on these pieces:
//! - [`values`]: records as they arrive, and their canonical values
//! - [`resolver`]: logical type inference and default type casts
//! - [`schema`]: destination tables and the reconciler
//! - [`stream`]: bulk modes, stream state and the [`BulkerStream`] trait
//! - [`error`]: the shared error type

pub mod error;
pub mod resolver;
pub mod schema;
pub mod stream;
pub mod types;
pub mod values;

pub use error::{intercept, BulkError, ErrorContext, Result};
pub use resolver::{
    DefaultTypeResolver, DefaultTypes, DummyTypeResolver, SqlTypeHints, TypeResolver,
};
pub use schema::{
    dedup_last_wins, primary_key_name, reconcile, Column, ColumnDiff, Field, Fields, SchemaPlan,
    Table, TableTemplate, TypeMapping,
};
pub use stream::{BulkMode, BulkerStream, State, Status, StreamOptions, PARTITION_ID_COLUMN};
pub use types::LogicalType;
pub use values::{Record, Value};
