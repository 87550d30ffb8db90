//! PostgreSQL destination for bulkload.

pub mod adapter;
pub mod config;
pub mod dialect;

pub use adapter::{PostgresAdapter, POSTGRES_BULKER_TYPE};
pub use config::PostgresConfig;
pub use dialect::PostgreSQLDialect;
