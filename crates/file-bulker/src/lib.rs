//! Object-storage destinations for bulkload.
//!
//! [`FileStorage`] wraps an [`ObjectStore`] (S3 or a local directory) with
//! the destination's folder, file format and compression. [`FileStream`]
//! buffers records and writes them as one file per completed stream.
//!
//! # Example
//!
//! ```ignore
//! let storage = Arc::new(FileStorage::connect_s3(S3Config::from_value(blob)?).await?);
//! let mut stream = FileStream::new("s1", storage, "events", BulkMode::Transactional, StreamOptions::new())?;
//! stream.consume(Record::from_json_str(r#"{"id": 1}"#)?).await?;
//! let state = stream.complete().await?;
//! ```

pub mod config;
pub mod credentials;
pub mod format;
pub mod local;
pub mod s3;
pub mod storage;
pub mod store;
pub mod stream;

pub use config::{FileConfig, LocalConfig, S3Config};
pub use credentials::{AccessKey, KeyFile, WORKLOAD_IDENTITY};
pub use format::{FileCompression, FileFormat};
pub use local::{LocalStore, LOCAL_STORE_TYPE};
pub use s3::{S3Options, S3Store, S3_STORE_TYPE};
pub use storage::FileStorage;
pub use store::{ObjectMeta, ObjectStore};
pub use stream::FileStream;
