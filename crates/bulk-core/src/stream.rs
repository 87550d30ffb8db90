//! Stream protocol: bulk modes, state and the stream trait every backend implements.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{BulkError, Result};
use crate::resolver::{DefaultTypes, SqlTypeHints};
use crate::types::LogicalType;
use crate::values::Record;

/// Column added to every row written by a `ReplacePartition` stream.
pub const PARTITION_ID_COLUMN: &str = "__partition_id";

/// Commit strategy of a stream, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BulkMode {
    /// Every consumed record is committed immediately.
    #[serde(rename = "autocommit")]
    AutoCommit,
    /// Records are buffered and committed in one transaction on complete.
    #[serde(rename = "transactional", alias = "batch")]
    Transactional,
    /// Records are loaded into a staging table that replaces the target on complete.
    #[serde(rename = "replace_table")]
    ReplaceTable,
    /// Like `ReplaceTable`, limited to the rows of one partition.
    #[serde(rename = "replace_partition")]
    ReplacePartition,
}

impl BulkMode {
    pub const ALL: [BulkMode; 4] = [
        BulkMode::AutoCommit,
        BulkMode::Transactional,
        BulkMode::ReplaceTable,
        BulkMode::ReplacePartition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BulkMode::AutoCommit => "autocommit",
            BulkMode::Transactional => "transactional",
            BulkMode::ReplaceTable => "replace_table",
            BulkMode::ReplacePartition => "replace_partition",
        }
    }

    /// Whether records are held until complete.
    pub fn is_buffered(&self) -> bool {
        !matches!(self, BulkMode::AutoCommit)
    }
}

impl fmt::Display for BulkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulkMode {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "autocommit" | "stream" => Ok(BulkMode::AutoCommit),
            "transactional" | "batch" => Ok(BulkMode::Transactional),
            "replace_table" | "replacetable" => Ok(BulkMode::ReplaceTable),
            "replace_partition" | "replacepartition" => Ok(BulkMode::ReplacePartition),
            other => Err(BulkError::config(format!("unknown bulk mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Completed,
    Aborted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Active => "active",
            Status::Completed => "completed",
            Status::Aborted => "aborted",
        })
    }
}

/// Outcome of a stream so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub status: Status,
    pub processed_rows: u64,
    pub successful_rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl State {
    pub fn new() -> Self {
        Self {
            status: Status::Active,
            processed_rows: 0,
            successful_rows: 0,
            last_error: None,
        }
    }

    pub fn failed_rows(&self) -> u64 {
        self.processed_rows.saturating_sub(self.successful_rows)
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    /// Fails with [`BulkError::StreamNotActive`] once the stream has finished.
    pub fn ensure_active(&self, stream_id: &str) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(BulkError::StreamNotActive {
                id: stream_id.to_string(),
                status: self.status,
            })
        }
    }

    /// Record `err` as the last error and hand it back.
    pub fn record_error(&mut self, err: BulkError) -> BulkError {
        self.last_error = Some(err.to_string());
        err
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-stream options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOptions {
    pub primary_key: IndexSet<String>,
    /// Upsert on the primary key; the last record with a key wins.
    pub merge_rows: bool,
    /// Partition replaced by a `ReplacePartition` stream.
    pub partition_id: Option<String>,
    pub default_types: DefaultTypes,
    pub sql_types: SqlTypeHints,
    /// Widen existing non-key columns instead of rejecting values that do not fit.
    pub column_widening: bool,
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_merge_rows(mut self) -> Self {
        self.merge_rows = true;
        self
    }

    pub fn with_partition(mut self, partition_id: impl Into<String>) -> Self {
        self.partition_id = Some(partition_id.into());
        self
    }

    pub fn with_default_type(mut self, field: impl Into<String>, logical_type: LogicalType) -> Self {
        self.default_types.insert(field.into(), logical_type);
        self
    }

    pub fn with_sql_type(mut self, field: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.sql_types.insert(field.into(), sql_type.into());
        self
    }

    pub fn with_column_widening(mut self) -> Self {
        self.column_widening = true;
        self
    }

    /// Fill unset options from destination defaults. Explicit options win.
    pub fn with_defaults(mut self, defaults: &StreamOptions) -> Self {
        if self.primary_key.is_empty() {
            self.primary_key = defaults.primary_key.clone();
        }
        self.merge_rows |= defaults.merge_rows;
        if self.partition_id.is_none() {
            self.partition_id = defaults.partition_id.clone();
        }
        for (field, logical_type) in &defaults.default_types {
            self.default_types.entry(field.clone()).or_insert(*logical_type);
        }
        for (field, sql_type) in &defaults.sql_types {
            self.sql_types.entry(field.clone()).or_insert_with(|| sql_type.clone());
        }
        self.column_widening |= defaults.column_widening;
        self
    }

    pub fn validate(&self, mode: BulkMode) -> Result<()> {
        if mode == BulkMode::ReplacePartition
            && self.partition_id.as_deref().map_or(true, str::is_empty)
        {
            return Err(BulkError::config(
                "replace_partition mode requires a partition id",
            ));
        }
        if self.merge_rows && self.primary_key.is_empty() {
            return Err(BulkError::config(
                "merge rows requires a primary key to be set",
            ));
        }
        if self.primary_key.iter().any(|c| c == PARTITION_ID_COLUMN) {
            return Err(BulkError::config(format!(
                "{PARTITION_ID_COLUMN} is reserved and cannot be part of the primary key"
            )));
        }
        Ok(())
    }
}

/// One ingestion session bound to a table and a bulk mode.
///
/// A stream is single-writer: callers serialise `consume` calls. A failed
/// `consume` leaves the stream active; the caller decides whether to go on
/// or to `abort`. A failed `complete` also leaves it active, and the caller
/// must `abort`.
#[async_trait]
pub trait BulkerStream: Send {
    fn id(&self) -> &str;

    fn mode(&self) -> BulkMode;

    fn state(&self) -> State;

    async fn consume(&mut self, record: Record) -> Result<()>;

    async fn complete(&mut self) -> Result<State>;

    /// Discard pending data. A no-op once the stream has finished.
    async fn abort(&mut self) -> Result<State>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_mode_names() {
        for mode in BulkMode::ALL {
            assert_eq!(mode.as_str().parse::<BulkMode>().unwrap(), mode);
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{mode}\""));
        }
        assert_eq!("batch".parse::<BulkMode>().unwrap(), BulkMode::Transactional);
        let alias: BulkMode = serde_json::from_str("\"batch\"").unwrap();
        assert_eq!(alias, BulkMode::Transactional);
        assert!("bogus".parse::<BulkMode>().is_err());
    }

    #[test]
    fn test_state_counts() {
        let mut state = State::new();
        state.processed_rows = 5;
        state.successful_rows = 3;
        assert_eq!(state.failed_rows(), 2);
        assert!(state.ensure_active("s1").is_ok());

        state.status = Status::Completed;
        let err = state.ensure_active("s1").unwrap_err();
        assert_eq!(err.to_string(), "stream 's1' is not active (status: completed)");
    }

    #[test]
    fn test_validate_partition_requires_id() {
        let opts = StreamOptions::new();
        assert!(opts.validate(BulkMode::ReplacePartition).is_err());
        assert!(opts.validate(BulkMode::ReplaceTable).is_ok());
        assert!(StreamOptions::new()
            .with_partition("p1")
            .validate(BulkMode::ReplacePartition)
            .is_ok());
    }

    #[test]
    fn test_validate_merge_requires_primary_key() {
        let opts = StreamOptions::new().with_merge_rows();
        assert!(matches!(
            opts.validate(BulkMode::Transactional),
            Err(BulkError::Config(_))
        ));
        let opts = opts.with_primary_key(["id"]);
        assert!(opts.validate(BulkMode::Transactional).is_ok());
    }

    #[test]
    fn test_with_defaults_keeps_explicit_options() {
        let defaults = StreamOptions::new()
            .with_primary_key(["id"])
            .with_merge_rows()
            .with_sql_type("amount", "numeric")
            .with_default_type("user_id", LogicalType::String);
        let opts = StreamOptions::new()
            .with_primary_key(["key"])
            .with_sql_type("amount", "text")
            .with_defaults(&defaults);

        assert_eq!(opts.primary_key.iter().collect::<Vec<_>>(), vec!["key"]);
        assert!(opts.merge_rows);
        assert_eq!(opts.sql_types["amount"], "text");
        assert_eq!(opts.default_types["user_id"], LogicalType::String);
    }
}
