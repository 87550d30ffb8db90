//! Local filesystem object store.
//!
//! Objects are plain files under a root directory. Writes go to a temporary
//! file in the target directory and are renamed into place, so a reader
//! never sees a half-written object. Object metadata lives next to the file
//! in a `<name>.meta.json` sidecar.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bulk_core::{BulkError, ErrorContext, Result};

use crate::store::{ObjectMeta, ObjectStore};

pub const LOCAL_STORE_TYPE: &str = "file";

const META_SUFFIX: &str = ".meta.json";
const TMP_SUFFIX: &str = ".tmp";

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn context(&self, key: &str) -> ErrorContext {
        ErrorContext::new(self.describe()).with_statement(format!("file: {key}"))
    }

    /// Resolve `key` under the root, refusing keys that would escape it.
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(BulkError::stage_io(
                "invalid object key",
                self.context(key),
                format!("key '{key}' must be a relative path without '..'"),
            ));
        }
        Ok(self.root.join(relative))
    }

    fn io_error(&self, message: &str, key: &str, err: std::io::Error) -> BulkError {
        BulkError::stage_io(message, self.context(key), err)
    }
}

fn sidecar(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(META_SUFFIX);
    PathBuf::from(name)
}

fn is_internal(name: &str) -> bool {
    name.ends_with(META_SUFFIX) || name.ends_with(TMP_SUFFIX)
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn type_id(&self) -> &'static str {
        LOCAL_STORE_TYPE
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn put(&self, key: &str, body: Vec<u8>, meta: &ObjectMeta) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error("failed to create directory", key, e))?;
        }

        let tmp = path.with_file_name(format!(
            ".{}.{}{TMP_SUFFIX}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("object"),
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| self.io_error("failed to write file", key, e))?;

        let meta_json = serde_json::to_vec(meta).map_err(|e| {
            BulkError::stage_io("failed to encode object metadata", self.context(key), e)
        })?;
        tokio::fs::write(sidecar(&path), meta_json)
            .await
            .map_err(|e| self.io_error("failed to write object metadata", key, e))?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error("failed to move file into place", key, e));
        }
        tracing::debug!("Wrote {} bytes to {}", body.len(), path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| self.io_error("failed to read file", key, e))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let path = self.object_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error("failed to stat file", key, e)),
        }
        match tokio::fs::read(sidecar(&path)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                BulkError::stage_io("malformed object metadata", self.context(key), e)
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some(ObjectMeta::default())),
            Err(e) => Err(self.io_error("failed to read object metadata", key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        for target in [path.clone(), sidecar(&path)] {
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(self.io_error("failed to delete file", key, e)),
            }
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, dir_key)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(self.io_error("failed to read directory", prefix, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| self.io_error("failed to read directory", prefix, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = format!("{dir_key}{name}");
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| self.io_error("failed to read file type", &key, e))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{key}/")));
                } else if !is_internal(&name) && key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        tracing::debug!("Listed {} objects under {}/{}", keys.len(), self.describe(), prefix);
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ndjson_meta() -> ObjectMeta {
        ObjectMeta {
            content_type: Some("application/x-ndjson".to_string()),
            content_encoding: None,
        }
    }

    #[tokio::test]
    async fn test_put_get_replaces_object() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        store.put("events/a.ndjson", b"one".to_vec(), &ndjson_meta()).await.unwrap();
        store.put("events/a.ndjson", b"two".to_vec(), &ndjson_meta()).await.unwrap();

        assert_eq!(store.get("events/a.ndjson").await.unwrap(), b"two");
        assert_eq!(
            store.head("events/a.ndjson").await.unwrap(),
            Some(ndjson_meta())
        );
        assert_eq!(store.head("events/missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_skips_sidecars_and_filters_prefix() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        for key in ["t/b.ndjson", "t/a.ndjson", "t.ndjson", "other/c.ndjson"] {
            store.put(key, Vec::new(), &ObjectMeta::default()).await.unwrap();
        }

        assert_eq!(
            store.list("t/").await.unwrap(),
            vec!["t/a.ndjson".to_string(), "t/b.ndjson".to_string()]
        );
        assert_eq!(store.list("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("x.csv", b"a".to_vec(), &ObjectMeta::default()).await.unwrap();

        store.delete("x.csv").await.unwrap();
        store.delete("x.csv").await.unwrap();
        assert!(store.list("").await.unwrap().is_empty());
        assert!(store.get("x.csv").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        let err = store
            .put("../outside", Vec::new(), &ObjectMeta::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid object key"));
        assert!(store.get("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_list_missing_root() {
        let store = LocalStore::new("/nonexistent/bulkload/root");
        assert!(store.list("").await.unwrap().is_empty());
    }
}
