//! SQL destinations for bulkload.
//!
//! [`SqlAdapter`] is the capability set a SQL backend implements;
//! [`SqlStream`] drives it for every bulk mode. [`MemoryAdapter`] is a
//! complete in-process backend used for dry runs and tests.

pub mod adapter;
pub mod memory;
pub mod stream;

pub use adapter::{CompareOp, Condition, LoadOutcome, OrderBy, SqlAdapter, TableOp};
pub use memory::{MemoryAdapter, MEMORY_BULKER_TYPE};
pub use stream::SqlStream;
