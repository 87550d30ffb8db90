//! Stream engine for object-storage destinations.
//!
//! Records are buffered and written as one file at complete. Object names:
//!
//! - `Transactional`: a new file `{table}/{table}_{yyyymmddThhmmss}_{stream}.{ext}`
//!   per completed stream.
//! - `ReplaceTable`: `{table}.{ext}` is overwritten, then earlier batch files
//!   under `{table}/` are removed.
//! - `ReplacePartition`: every row gets the partition id and
//!   `{table}/partition={id}.{ext}` is overwritten.
//!
//! A single-object PUT replaces the previous object in one step, so readers
//! see either the old or the new file.

use std::sync::Arc;

use async_trait::async_trait;
use bulk_core::{
    dedup_last_wins, BulkError, BulkMode, BulkerStream, DummyTypeResolver, ErrorContext, Record,
    Result, State, Status, StreamOptions, TypeResolver, Value, PARTITION_ID_COLUMN,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::format::{encode, file_extension};
use crate::storage::FileStorage;

pub struct FileStream {
    id: String,
    table_name: String,
    mode: BulkMode,
    options: StreamOptions,
    storage: Arc<FileStorage>,
    resolver: DummyTypeResolver,
    state: State,
    batch: Vec<Record>,
    started_at: DateTime<Utc>,
}

impl FileStream {
    pub fn new(
        id: impl Into<String>,
        storage: Arc<FileStorage>,
        table_name: impl Into<String>,
        mode: BulkMode,
        options: StreamOptions,
    ) -> Result<Self> {
        if mode == BulkMode::AutoCommit {
            return Err(BulkError::ModeUnsupported {
                backend: storage.type_id().to_string(),
                mode,
                reason: "single-object writes are not available, use transactional mode".to_string(),
            });
        }
        options.validate(mode)?;

        let id = id.into();
        let table_name = table_name.into();
        info!(
            "Created {} stream '{}' for table '{}' ({})",
            mode,
            id,
            table_name,
            storage.type_id()
        );
        Ok(Self {
            id,
            table_name,
            mode,
            options,
            storage,
            resolver: DummyTypeResolver,
            state: State::new(),
            batch: Vec::new(),
            started_at: Utc::now(),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn extension(&self) -> String {
        file_extension(self.storage.format(), self.storage.compression())
    }

    /// File name (relative to the storage folder) this stream writes.
    pub fn file_name(&self) -> String {
        let table = file_safe(&self.table_name);
        let ext = self.extension();
        match self.mode {
            BulkMode::ReplaceTable => format!("{table}.{ext}"),
            BulkMode::ReplacePartition => format!(
                "{table}/partition={}.{ext}",
                file_safe(self.options.partition_id.as_deref().unwrap_or_default())
            ),
            _ => format!(
                "{table}/{table}_{}_{}.{ext}",
                self.started_at.format("%Y%m%dT%H%M%S"),
                file_safe(&self.id)
            ),
        }
    }

    /// Write the batch. Returns issues that did not fail the load.
    async fn flush(&mut self) -> Result<Vec<String>> {
        if self.batch.is_empty() {
            return Ok(Vec::new());
        }

        let deduped;
        let rows: &[Record] = if self.options.merge_rows {
            deduped = dedup_last_wins(self.batch.clone(), &self.options.primary_key);
            &deduped
        } else {
            &self.batch
        };

        let file_name = self.file_name();
        let body = encode(rows, self.storage.format(), self.storage.compression()).map_err(|e| {
            BulkError::stage_io(
                "failed to encode batch",
                ErrorContext::new(&self.table_name).with_statement(format!("file: {file_name}")),
                e,
            )
        })?;
        debug!(
            "Uploading {} rows ({} bytes) to '{}'",
            rows.len(),
            body.len(),
            self.storage.path(&file_name)
        );
        self.storage.upload_bytes(&file_name, body).await?;

        let mut warnings = Vec::new();
        if self.mode == BulkMode::ReplaceTable {
            let prefix = format!("{}/", file_safe(&self.table_name));
            match self.storage.list(&prefix).await {
                Ok(stale) => {
                    for old in stale {
                        if let Err(err) = self.storage.delete_object(&old).await {
                            warn!("Failed to delete replaced file '{old}': {err}");
                            warnings.push(format!("failed to delete replaced file '{old}': {err}"));
                        }
                    }
                }
                Err(err) => {
                    warn!("Failed to list replaced files under '{prefix}': {err}");
                    warnings.push(format!("failed to list replaced files under '{prefix}': {err}"));
                }
            }
        }
        Ok(warnings)
    }
}

/// Keep object names to a single path segment.
fn file_safe(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

#[async_trait]
impl BulkerStream for FileStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn mode(&self) -> BulkMode {
        self.mode
    }

    fn state(&self) -> State {
        self.state.clone()
    }

    async fn consume(&mut self, mut record: Record) -> Result<()> {
        self.state.ensure_active(&self.id)?;
        self.state.processed_rows += 1;

        if self.mode == BulkMode::ReplacePartition {
            if let Some(partition_id) = &self.options.partition_id {
                record.insert(
                    PARTITION_ID_COLUMN.to_string(),
                    Value::String(partition_id.clone()),
                );
            }
        }
        if let Err(err) = self.resolver.resolve(&mut record, &self.options.sql_types) {
            return Err(self.state.record_error(err));
        }
        self.batch.push(record);
        Ok(())
    }

    async fn complete(&mut self) -> Result<State> {
        self.state.ensure_active(&self.id)?;
        let warnings = match self.flush().await {
            Ok(warnings) => warnings,
            Err(err) => return Err(self.state.record_error(err)),
        };

        self.state.successful_rows = self.batch.len() as u64;
        if !warnings.is_empty() {
            self.state.last_error = Some(warnings.join("; "));
        }
        self.batch.clear();
        self.state.status = Status::Completed;
        info!(
            "Completed stream '{}' for table '{}': {} processed, {} successful",
            self.id, self.table_name, self.state.processed_rows, self.state.successful_rows
        );
        Ok(self.state.clone())
    }

    /// Nothing is uploaded before complete, so aborting only drops the buffer.
    async fn abort(&mut self) -> Result<State> {
        if !self.state.is_active() {
            return Ok(self.state.clone());
        }
        self.batch.clear();
        self.state.status = Status::Aborted;
        info!("Aborted stream '{}' for table '{}'", self.id, self.table_name);
        Ok(self.state.clone())
    }
}
