//! Object-storage adapter shared by every file stream of a destination.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use bulk_core::{intercept, BulkError, ErrorContext, Result};
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{info, warn};

use crate::config::{FileConfig, LocalConfig, S3Config};
use crate::format::{FileCompression, FileFormat};
use crate::local::LocalStore;
use crate::s3::S3Store;
use crate::store::{ObjectMeta, ObjectStore};

pub struct FileStorage {
    config: FileConfig,
    store: Box<dyn ObjectStore>,
    closed: AtomicBool,
}

impl FileStorage {
    pub fn new(config: FileConfig, store: Box<dyn ObjectStore>) -> Self {
        info!(
            "Opened {} file storage at {} (folder '{}', {}{})",
            store.type_id(),
            store.describe(),
            config.folder,
            config.format,
            if config.compression == FileCompression::Gzip { ", gzip" } else { "" }
        );
        Self {
            config,
            store,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn connect_s3(config: S3Config) -> Result<Self> {
        config.validate()?;
        // TODO: rebuild the client after transient connection failures
        let store = S3Store::connect(config.s3_options()?).await?;
        Ok(Self::new(config.file_config(), Box::new(store)))
    }

    pub fn local(config: LocalConfig) -> Result<Self> {
        config.validate()?;
        let store = LocalStore::new(&config.path);
        Ok(Self::new(config.file_config(), Box::new(store)))
    }

    pub fn type_id(&self) -> &'static str {
        self.store.type_id()
    }

    pub fn format(&self) -> FileFormat {
        self.config.format
    }

    pub fn compression(&self) -> FileCompression {
        self.config.compression
    }

    /// Object key of `file_name` inside the configured folder.
    pub fn path(&self, file_name: &str) -> String {
        let folder = self.config.folder.trim_end_matches('/');
        if folder.is_empty() {
            file_name.to_string()
        } else {
            format!("{folder}/{file_name}")
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BulkError::Closed(format!("{} storage", self.type_id())));
        }
        Ok(())
    }

    fn context(&self, key: &str) -> ErrorContext {
        ErrorContext::new(self.store.describe()).with_statement(format!("file: {key}"))
    }

    async fn guarded<T, F>(&self, operation: &str, key: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check_open()?;
        intercept(&self.context(key), operation, fut).await
    }

    fn upload_meta(&self) -> ObjectMeta {
        ObjectMeta {
            content_type: Some(self.config.format.content_type().to_string()),
            content_encoding: self
                .config
                .compression
                .content_encoding()
                .map(str::to_string),
        }
    }

    /// Upload `file_bytes` as `file_name`, replacing any previous object.
    pub async fn upload_bytes(&self, file_name: &str, file_bytes: Vec<u8>) -> Result<()> {
        let key = self.path(file_name);
        let meta = self.upload_meta();
        self.guarded(
            "uploading file",
            &key,
            self.store.put(&key, file_bytes, &meta),
        )
        .await
    }

    pub async fn upload<R>(&self, file_name: &str, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.check_open()?;
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.map_err(|e| {
            BulkError::stage_io("failed to read upload body", self.context(&self.path(file_name)), e)
        })?;
        self.upload_bytes(file_name, body).await
    }

    pub async fn download(&self, file_name: &str) -> Result<Vec<u8>> {
        let key = self.path(file_name);
        self.guarded("downloading file", &key, self.store.get(&key)).await
    }

    pub async fn metadata(&self, file_name: &str) -> Result<Option<ObjectMeta>> {
        let key = self.path(file_name);
        self.guarded("reading file metadata", &key, self.store.head(&key))
            .await
    }

    pub async fn delete_object(&self, file_name: &str) -> Result<()> {
        let key = self.path(file_name);
        self.guarded("deleting file", &key, self.store.delete(&key)).await
    }

    /// File names (relative to the folder) starting with `prefix`.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let key_prefix = self.path(prefix);
        let keys = self
            .guarded("listing files", &key_prefix, self.store.list(&key_prefix))
            .await?;
        let folder = self.path("");
        Ok(keys
            .into_iter()
            .map(|key| key.strip_prefix(&folder).unwrap_or(&key).to_string())
            .collect())
    }

    /// Create and remove an empty object to check that the destination
    /// accepts writes. Only the upload has to succeed.
    pub async fn validate_write_permission(&self) -> Result<()> {
        let file_name = format!("test_{}", Utc::now().format("%Y%m%dT%H%M%S%.f"));
        self.upload_bytes(&file_name, Vec::new()).await?;
        if let Err(err) = self.delete_object(&file_name).await {
            warn!("Cannot remove object '{}': {}", self.path(&file_name), err);
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closed {} file storage", self.store.describe());
        self.store.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
