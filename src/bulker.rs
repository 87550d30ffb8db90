//! Live destination handle.

use std::sync::Arc;

use bulk_core::{BulkMode, BulkerStream, Result, StreamOptions};
use file_bulker::{FileStorage, FileStream};
use sql_bulker::{SqlAdapter, SqlStream};
use tracing::info;

/// Backend a [`Bulker`] writes to.
#[derive(Clone)]
pub enum Backend {
    Sql(Arc<dyn SqlAdapter>),
    Files(Arc<FileStorage>),
}

/// A connected destination. Streams created from it share its backend.
pub struct Bulker {
    id: String,
    bulker_type: String,
    backend: Backend,
    stream_defaults: StreamOptions,
}

impl Bulker {
    pub fn new(
        id: impl Into<String>,
        bulker_type: impl Into<String>,
        backend: Backend,
        stream_defaults: StreamOptions,
    ) -> Self {
        Self {
            id: id.into(),
            bulker_type: bulker_type.into(),
            backend,
            stream_defaults,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bulker_type(&self) -> &str {
        &self.bulker_type
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn stream_defaults(&self) -> &StreamOptions {
        &self.stream_defaults
    }

    pub fn sql_adapter(&self) -> Option<&Arc<dyn SqlAdapter>> {
        match &self.backend {
            Backend::Sql(adapter) => Some(adapter),
            Backend::Files(_) => None,
        }
    }

    pub fn file_storage(&self) -> Option<&Arc<FileStorage>> {
        match &self.backend {
            Backend::Files(storage) => Some(storage),
            Backend::Sql(_) => None,
        }
    }

    /// Open a stream into `table_name`. Explicit `options` win over the
    /// destination's stream defaults. An unsupported mode or inconsistent
    /// options fail here, before any I/O.
    pub fn create_stream(
        &self,
        id: impl Into<String>,
        table_name: impl Into<String>,
        mode: BulkMode,
        options: StreamOptions,
    ) -> Result<Box<dyn BulkerStream>> {
        let options = options.with_defaults(&self.stream_defaults);
        let stream: Box<dyn BulkerStream> = match &self.backend {
            Backend::Sql(adapter) => Box::new(SqlStream::new(
                id,
                adapter.clone(),
                table_name,
                mode,
                options,
            )?),
            Backend::Files(storage) => Box::new(FileStream::new(
                id,
                storage.clone(),
                table_name,
                mode,
                options,
            )?),
        };
        Ok(stream)
    }

    pub async fn close(&self) -> Result<()> {
        info!("Closing {} destination '{}'", self.bulker_type, self.id);
        match &self.backend {
            Backend::Sql(adapter) => adapter.close().await,
            Backend::Files(storage) => storage.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulk_core::{BulkError, Record, Status};
    use sql_bulker::MemoryAdapter;

    fn memory_bulker(defaults: StreamOptions) -> Bulker {
        Bulker::new(
            "mem",
            "memory",
            Backend::Sql(Arc::new(MemoryAdapter::new())),
            defaults,
        )
    }

    #[tokio::test]
    async fn test_stream_defaults_apply() {
        let bulker = memory_bulker(StreamOptions::new().with_primary_key(["id"]).with_merge_rows());
        let mut stream = bulker
            .create_stream("s", "events", BulkMode::Transactional, StreamOptions::new())
            .unwrap();
        for json in [r#"{"id": 1, "v": "a"}"#, r#"{"id": 1, "v": "b"}"#] {
            stream.consume(Record::from_json_str(json).unwrap()).await.unwrap();
        }
        let state = stream.complete().await.unwrap();
        assert_eq!(state.status, Status::Completed);

        let adapter = bulker.sql_adapter().unwrap();
        let rows = adapter.select("events", &[], &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        let table = adapter.get_table_schema("events").await.unwrap().unwrap();
        assert_eq!(table.primary_key_name, "events_pk");
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_io() {
        let bulker = memory_bulker(StreamOptions::new());
        let result = bulker.create_stream(
            "s",
            "events",
            BulkMode::ReplacePartition,
            StreamOptions::new(),
        );
        assert!(matches!(result, Err(BulkError::Config(_))));
        assert!(bulker.file_storage().is_none());
    }

    #[tokio::test]
    async fn test_closed_bulker_rejects_new_streams() {
        let bulker = memory_bulker(StreamOptions::new());
        bulker.close().await.unwrap();
        let result =
            bulker.create_stream("s", "events", BulkMode::AutoCommit, StreamOptions::new());
        assert!(matches!(result, Err(BulkError::Closed(_))));
    }

    #[tokio::test]
    async fn test_close_under_open_stream_fails_consume() {
        let bulker = memory_bulker(StreamOptions::new());
        let mut stream = bulker
            .create_stream("s", "events", BulkMode::AutoCommit, StreamOptions::new())
            .unwrap();
        bulker.close().await.unwrap();

        let err = stream
            .consume(Record::from_json_str(r#"{"id": 1}"#).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Closed(_)));
        let state = stream.state();
        assert_eq!(state.failed_rows(), 1);
        assert_eq!(state.status, Status::Active);
    }
}
