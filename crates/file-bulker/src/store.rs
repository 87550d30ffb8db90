//! Object store seam shared by the S3 and local-filesystem backends.

use async_trait::async_trait;
use bulk_core::Result;
use serde::{Deserialize, Serialize};

/// Metadata set on an uploaded object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
}

/// Flat key/value object storage.
///
/// Keys are `/`-separated paths relative to the store root (bucket). A
/// successful `put` replaces any previous object under the same key in one
/// step; readers see either the old or the new body.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name, e.g. `s3`.
    fn type_id(&self) -> &'static str;

    /// Location of the store root for messages, e.g. `s3://bucket`.
    fn describe(&self) -> String;

    async fn put(&self, key: &str, body: Vec<u8>, meta: &ObjectMeta) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Release the underlying client.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
