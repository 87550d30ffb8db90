//! Stream engine for SQL destinations.
//!
//! One [`SqlStream`] runs a single ingestion session against one table:
//!
//! - `AutoCommit`: each record is resolved, the table is created or patched
//!   as needed, and the record is inserted right away.
//! - `Transactional`: records are buffered; complete creates or patches the
//!   table and inserts the batch in one atomic unit.
//! - `ReplaceTable`: the batch goes into a staging table that replaces the
//!   target in the same atomic unit.
//! - `ReplacePartition`: every row gets the partition id; complete deletes
//!   the partition's old rows and inserts the batch atomically.

use std::sync::Arc;

use async_trait::async_trait;
use bulk_core::{
    dedup_last_wins, reconcile, BulkError, BulkMode, BulkerStream, DefaultTypeResolver, Fields,
    Record, Result, SchemaPlan, State, Status, StreamOptions, Table, TableTemplate, TypeResolver,
    Value, PARTITION_ID_COLUMN,
};
use tracing::{debug, info, warn};

use crate::adapter::{LoadOutcome, SqlAdapter, TableOp};

pub struct SqlStream {
    id: String,
    table_name: String,
    mode: BulkMode,
    options: StreamOptions,
    adapter: Arc<dyn SqlAdapter>,
    resolver: DefaultTypeResolver,
    state: State,
    /// Destination shape as last seen by this stream (AutoCommit).
    table: Option<Table>,
    batch_fields: Fields,
    batch: Vec<Record>,
    staging_table: Option<String>,
}

impl SqlStream {
    /// Create a stream. Mode and options are validated here, before any I/O.
    pub fn new(
        id: impl Into<String>,
        adapter: Arc<dyn SqlAdapter>,
        table_name: impl Into<String>,
        mode: BulkMode,
        options: StreamOptions,
    ) -> Result<Self> {
        adapter.check_mode(mode)?;
        options.validate(mode)?;

        let id = id.into();
        let table_name = table_name.into();
        info!(
            "Created {} stream '{}' for table '{}' ({})",
            mode,
            id,
            table_name,
            adapter.type_id()
        );

        let resolver = DefaultTypeResolver::new().with_default_types(&options.default_types);
        Ok(Self {
            id,
            table_name,
            mode,
            options,
            adapter,
            resolver,
            state: State::new(),
            table: None,
            batch_fields: Fields::new(),
            batch: Vec::new(),
            staging_table: None,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn template(&self, name: &str) -> TableTemplate {
        TableTemplate {
            name: name.to_string(),
            pk_fields: self.options.primary_key.clone(),
            column_widening: self.options.column_widening,
        }
    }

    async fn consume_record(&mut self, mut record: Record) -> Result<()> {
        if let Some(partition_id) = self.partition_id() {
            record.insert(
                PARTITION_ID_COLUMN.to_string(),
                Value::String(partition_id.to_string()),
            );
        }
        let fields = self.resolver.resolve(&mut record, &self.options.sql_types)?;

        if self.mode == BulkMode::AutoCommit {
            self.ensure_table(&fields).await?;
            let table = self.table.as_ref().ok_or_else(|| {
                BulkError::schema_conflict(&self.table_name, "table is not known after reconcile")
            })?;
            self.adapter
                .insert(table, std::slice::from_ref(&record), self.options.merge_rows)
                .await?;
            self.state.successful_rows += 1;
        } else {
            self.batch_fields.merge(fields);
            self.batch.push(record);
        }
        Ok(())
    }

    fn partition_id(&self) -> Option<&str> {
        match self.mode {
            BulkMode::ReplacePartition => self.options.partition_id.as_deref(),
            _ => None,
        }
    }

    /// Make sure the destination can take `fields`. The table is fetched
    /// lazily; if creating or patching fails, the shape is fetched again
    /// once in case another writer changed it meanwhile.
    async fn ensure_table(&mut self, fields: &Fields) -> Result<()> {
        if self.table.is_none() {
            self.table = self.adapter.get_table_schema(&self.table_name).await?;
        }
        let template = self.template(&self.table_name);
        let plan = reconcile(self.table.as_ref(), fields, &template, self.adapter.as_ref())?;

        match self.apply_plan(plan).await {
            Ok(table) => {
                self.table = Some(table);
                Ok(())
            }
            Err(err @ BulkError::StageIo { .. }) => {
                warn!(
                    "Schema change of '{}' failed, refreshing table schema and retrying: {}",
                    self.table_name, err
                );
                let current = self.adapter.get_table_schema(&self.table_name).await?;
                let plan = reconcile(current.as_ref(), fields, &template, self.adapter.as_ref())?;
                self.table = Some(self.apply_plan(plan).await?);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn apply_plan(&self, plan: SchemaPlan) -> Result<Table> {
        match &plan {
            SchemaPlan::Unchanged(_) => {}
            SchemaPlan::Create(table) => self.adapter.create_table(table).await?,
            SchemaPlan::Patch { table, diff } => {
                self.adapter.patch_table(&table.name, diff).await?
            }
        }
        Ok(plan.into_table())
    }

    /// Write the buffered batch according to the stream's mode.
    async fn flush(&mut self) -> Result<LoadOutcome> {
        if self.mode == BulkMode::AutoCommit || self.batch.is_empty() {
            return Ok(LoadOutcome::default());
        }

        let merge = self.options.merge_rows;
        let deduped;
        let rows: &[Record] = if merge {
            deduped = dedup_last_wins(self.batch.clone(), &self.options.primary_key);
            &deduped
        } else {
            &self.batch
        };

        let existing = self.adapter.get_table_schema(&self.table_name).await?;
        let template = self.template(&self.table_name);
        let plan = reconcile(
            existing.as_ref(),
            &self.batch_fields,
            &template,
            self.adapter.as_ref(),
        )?;

        match self.mode {
            BulkMode::ReplaceTable => {
                let staging_name = self.adapter.staging_table_name(&self.table_name);
                self.staging_table = Some(staging_name.clone());
                // Existing column definitions carry over to the replacement.
                let staging = plan.table().clone_named(staging_name);
                let ops = [
                    TableOp::Drop {
                        table: &staging.name,
                        if_exists: true,
                    },
                    TableOp::Create(&staging),
                    TableOp::Insert {
                        table: &staging,
                        rows,
                        merge,
                    },
                    TableOp::Drop {
                        table: &self.table_name,
                        if_exists: true,
                    },
                    TableOp::Rename {
                        from: &staging,
                        to: &self.table_name,
                    },
                ];
                debug!(
                    "Replacing table '{}' through staging table '{}'",
                    self.table_name, staging.name
                );
                let outcome = self.adapter.execute_atomic(&ops).await?;
                self.staging_table = None;
                Ok(outcome)
            }
            BulkMode::ReplacePartition => {
                let partition_id = self.partition_id().unwrap_or_default().to_string();
                let mut ops = schema_ops(&plan);
                ops.push(TableOp::DeletePartition {
                    table: &self.table_name,
                    partition_id: &partition_id,
                });
                ops.push(TableOp::Insert {
                    table: plan.table(),
                    rows,
                    merge,
                });
                self.adapter.execute_atomic(&ops).await
            }
            _ => {
                let mut ops = schema_ops(&plan);
                ops.push(TableOp::Insert {
                    table: plan.table(),
                    rows,
                    merge,
                });
                self.adapter.execute_atomic(&ops).await
            }
        }
    }
}

fn schema_ops(plan: &SchemaPlan) -> Vec<TableOp<'_>> {
    match plan {
        SchemaPlan::Unchanged(_) => Vec::new(),
        SchemaPlan::Create(table) => vec![TableOp::Create(table)],
        SchemaPlan::Patch { table, diff } => vec![TableOp::Patch {
            table: &table.name,
            diff,
        }],
    }
}

#[async_trait]
impl BulkerStream for SqlStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn mode(&self) -> BulkMode {
        self.mode
    }

    fn state(&self) -> State {
        self.state.clone()
    }

    async fn consume(&mut self, record: Record) -> Result<()> {
        self.state.ensure_active(&self.id)?;
        self.state.processed_rows += 1;
        match self.consume_record(record).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.state.record_error(err)),
        }
    }

    async fn complete(&mut self) -> Result<State> {
        self.state.ensure_active(&self.id)?;
        let outcome = match self.flush().await {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.state.record_error(err)),
        };

        if self.mode.is_buffered() {
            self.state.successful_rows = self.batch.len() as u64;
        }
        if !outcome.warnings.is_empty() {
            self.state.last_error = Some(outcome.warnings.join("; "));
        }
        self.batch.clear();
        self.state.status = Status::Completed;
        info!(
            "Completed stream '{}' for table '{}': {} processed, {} successful",
            self.id, self.table_name, self.state.processed_rows, self.state.successful_rows
        );
        Ok(self.state.clone())
    }

    async fn abort(&mut self) -> Result<State> {
        if !self.state.is_active() {
            return Ok(self.state.clone());
        }
        self.batch.clear();
        self.batch_fields = Fields::new();
        if let Some(staging) = self.staging_table.take() {
            if let Err(err) = self.adapter.drop_table(&staging, true).await {
                warn!("Failed to drop staging table '{}': {}", staging, err);
            }
        }
        self.state.status = Status::Aborted;
        info!("Aborted stream '{}' for table '{}'", self.id, self.table_name);
        Ok(self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::OrderBy;
    use crate::memory::MemoryAdapter;
    use bulk_core::{LogicalType, TypeMapping};

    fn init_logging() {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sql_bulker=debug")),
            )
            .try_init()
            .ok();
    }

    fn record(json: &str) -> Record {
        Record::from_json_str(json).unwrap()
    }

    fn stream(
        adapter: &Arc<MemoryAdapter>,
        table: &str,
        mode: BulkMode,
        options: StreamOptions,
    ) -> SqlStream {
        SqlStream::new(format!("{table}_{mode}"), adapter.clone(), table, mode, options).unwrap()
    }

    async fn ids(adapter: &MemoryAdapter, table: &str) -> Vec<Value> {
        adapter
            .select(table, &[], &[OrderBy::asc("id")])
            .await
            .unwrap()
            .into_iter()
            .map(|r| r["id"].clone())
            .collect()
    }

    #[tokio::test]
    async fn test_autocommit_writes_each_record() {
        init_logging();
        let adapter = Arc::new(MemoryAdapter::new());
        let mut s = stream(&adapter, "events", BulkMode::AutoCommit, StreamOptions::new());

        s.consume(record(r#"{"id": 1}"#)).await.unwrap();
        assert_eq!(ids(&adapter, "events").await, vec![Value::Int(1)]);

        s.consume(record(r#"{"id": 2, "extra": "x"}"#)).await.unwrap();
        let table = adapter.get_table_schema("events").await.unwrap().unwrap();
        assert_eq!(table.column_names(), vec!["id", "extra"]);

        let state = s.complete().await.unwrap();
        assert_eq!(state.status, Status::Completed);
        assert_eq!((state.processed_rows, state.successful_rows), (2, 2));
    }

    #[tokio::test]
    async fn test_transactional_writes_nothing_until_complete() {
        init_logging();
        let adapter = Arc::new(MemoryAdapter::new());
        let mut s = stream(&adapter, "events", BulkMode::Transactional, StreamOptions::new());

        s.consume(record(r#"{"id": 1, "v": 1}"#)).await.unwrap();
        s.consume(record(r#"{"id": 2, "v": 1.5}"#)).await.unwrap();
        assert!(adapter.get_table_schema("events").await.unwrap().is_none());

        let state = s.complete().await.unwrap();
        assert_eq!(state.successful_rows, 2);
        let table = adapter.get_table_schema("events").await.unwrap().unwrap();
        // Widened within the batch
        assert_eq!(table.columns["v"].data_type, adapter.type_name(LogicalType::Float));
        assert_eq!(ids(&adapter, "events").await, vec![Value::Int(1), Value::Int(2)]);
    }

    #[tokio::test]
    async fn test_replace_table_swaps_contents() {
        init_logging();
        let adapter = Arc::new(MemoryAdapter::new());
        let mut first = stream(&adapter, "t", BulkMode::Transactional, StreamOptions::new());
        for id in 1..=3 {
            first.consume(record(&format!(r#"{{"id": {id}}}"#))).await.unwrap();
        }
        first.complete().await.unwrap();

        let mut s = stream(&adapter, "t", BulkMode::ReplaceTable, StreamOptions::new());
        s.consume(record(r#"{"id": 10}"#)).await.unwrap();
        assert_eq!(ids(&adapter, "t").await.len(), 3);
        s.complete().await.unwrap();

        assert_eq!(ids(&adapter, "t").await, vec![Value::Int(10)]);
        assert_eq!(adapter.table_names(), vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn test_replace_partition_only_touches_its_partition() {
        init_logging();
        let adapter = Arc::new(MemoryAdapter::new());
        for (partition, range) in [("p1", 1..=2), ("p2", 3..=4), ("p1", 5..=5)] {
            let options = StreamOptions::new().with_partition(partition);
            let mut s = stream(&adapter, "t", BulkMode::ReplacePartition, options);
            for id in range {
                s.consume(record(&format!(r#"{{"id": {id}}}"#))).await.unwrap();
            }
            s.complete().await.unwrap();
        }

        let rows = adapter.select("t", &[], &[OrderBy::asc("id")]).await.unwrap();
        let got: Vec<(Value, Value)> = rows
            .into_iter()
            .map(|r| (r["id"].clone(), r[PARTITION_ID_COLUMN].clone()))
            .collect();
        assert_eq!(
            got,
            vec![
                (Value::Int(3), Value::from("p2")),
                (Value::Int(4), Value::from("p2")),
                (Value::Int(5), Value::from("p1")),
            ]
        );
    }

    #[tokio::test]
    async fn test_merge_rows_last_wins() {
        init_logging();
        let adapter = Arc::new(MemoryAdapter::new());
        let options = StreamOptions::new().with_primary_key(["id"]).with_merge_rows();
        let mut s = stream(&adapter, "t", BulkMode::Transactional, options);
        for (id, name) in [(1, "a"), (2, "b"), (1, "c")] {
            s.consume(record(&format!(r#"{{"id": {id}, "name": "{name}"}}"#)))
                .await
                .unwrap();
        }
        let state = s.complete().await.unwrap();
        assert_eq!((state.processed_rows, state.successful_rows), (3, 3));

        let rows = adapter.select("t", &[], &[OrderBy::asc("id")]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], Value::from("c"));
        let table = adapter.get_table_schema("t").await.unwrap().unwrap();
        assert_eq!(table.primary_key_name, "t_pk");
    }

    #[tokio::test]
    async fn test_consume_error_keeps_stream_active() {
        init_logging();
        let adapter = Arc::new(MemoryAdapter::new());
        let options = StreamOptions::new().with_default_type("n", LogicalType::Integer);
        let mut s = stream(&adapter, "t", BulkMode::Transactional, options);

        let err = s.consume(record(r#"{"n": "x"}"#)).await.unwrap_err();
        assert!(matches!(err, BulkError::TypeConversion { .. }));
        assert_eq!(s.state().status, Status::Active);
        assert!(s.state().last_error.is_some());

        s.consume(record(r#"{"n": "5"}"#)).await.unwrap();
        let state = s.complete().await.unwrap();
        assert_eq!(state.processed_rows, 2);
        assert_eq!(state.successful_rows, 1);
        assert_eq!(state.failed_rows(), 1);
    }

    #[tokio::test]
    async fn test_abort_discards_batch_and_is_idempotent() {
        init_logging();
        let adapter = Arc::new(MemoryAdapter::new());
        let mut s = stream(&adapter, "t", BulkMode::Transactional, StreamOptions::new());
        s.consume(record(r#"{"id": 1}"#)).await.unwrap();

        let state = s.abort().await.unwrap();
        assert_eq!(state.status, Status::Aborted);
        assert!(adapter.get_table_schema("t").await.unwrap().is_none());
        assert_eq!(s.abort().await.unwrap().status, Status::Aborted);
        assert!(matches!(
            s.consume(record(r#"{"id": 2}"#)).await,
            Err(BulkError::StreamNotActive { .. })
        ));
    }

    #[tokio::test]
    async fn test_abort_after_complete_is_noop() {
        init_logging();
        let adapter = Arc::new(MemoryAdapter::new());
        let mut s = stream(&adapter, "t", BulkMode::ReplaceTable, StreamOptions::new());
        s.consume(record(r#"{"id": 1}"#)).await.unwrap();
        s.complete().await.unwrap();

        let state = s.abort().await.unwrap();
        assert_eq!(state.status, Status::Completed);
        assert_eq!(ids(&adapter, "t").await, vec![Value::Int(1)]);
    }

    #[tokio::test]
    async fn test_empty_batch_leaves_destination_untouched() {
        let adapter = Arc::new(MemoryAdapter::new());
        let mut s = stream(&adapter, "t", BulkMode::ReplaceTable, StreamOptions::new());
        let state = s.complete().await.unwrap();
        assert_eq!(state.processed_rows, 0);
        assert!(adapter.table_names().is_empty());
    }

    #[test]
    fn test_create_rejects_invalid_options() {
        let adapter: Arc<dyn SqlAdapter> = Arc::new(MemoryAdapter::new());
        let err = SqlStream::new(
            "s",
            adapter.clone(),
            "t",
            BulkMode::ReplacePartition,
            StreamOptions::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, BulkError::Config(_)));

        let options = StreamOptions::new().with_merge_rows();
        assert!(SqlStream::new("s", adapter, "t", BulkMode::Transactional, options).is_err());
    }
}
