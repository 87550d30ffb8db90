//! SqlAdapter trait definition.
//!
//! Every SQL destination implements this capability set. The stream engine
//! in [`crate::stream`] only talks to destinations through it.

use std::fmt;

use async_trait::async_trait;
use bulk_core::{BulkMode, ColumnDiff, Record, Result, Table, TypeMapping, Value};

/// Unit of work executed by [`SqlAdapter::execute_atomic`].
#[derive(Debug, Clone, Copy)]
pub enum TableOp<'a> {
    Create(&'a Table),
    Patch {
        table: &'a str,
        diff: &'a ColumnDiff,
    },
    Drop {
        table: &'a str,
        if_exists: bool,
    },
    /// Rename `from` (usually a staging table) to `to`, renaming its primary
    /// key constraint along with it.
    Rename {
        from: &'a Table,
        to: &'a str,
    },
    Insert {
        table: &'a Table,
        rows: &'a [Record],
        /// Upsert on the table's primary key.
        merge: bool,
    },
    /// Delete the rows of one partition.
    DeletePartition {
        table: &'a str,
        partition_id: &'a str,
    },
}

impl TableOp<'_> {
    /// Tables read or written by the operation.
    pub fn tables(&self) -> Vec<&str> {
        match *self {
            TableOp::Create(table) => vec![table.name.as_str()],
            TableOp::Patch { table, .. }
            | TableOp::Drop { table, .. }
            | TableOp::DeletePartition { table, .. } => vec![table],
            TableOp::Rename { from, to } => vec![from.name.as_str(), to],
            TableOp::Insert { table, .. } => vec![table.name.as_str()],
        }
    }
}

/// Result of an atomic load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub rows_written: u64,
    /// Issues the destination reported without failing the load.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }
}

/// `column op value` filter for [`SqlAdapter::select`].
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Condition {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, CompareOp::Eq, value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }

    /// Parse `"id asc, name desc"`.
    pub fn parse_list(s: &str) -> Vec<OrderBy> {
        s.split(',')
            .filter_map(|part| {
                let mut words = part.split_whitespace();
                let column = words.next()?;
                let descending = words
                    .next()
                    .is_some_and(|dir| dir.eq_ignore_ascii_case("desc"));
                Some(OrderBy {
                    column: column.to_string(),
                    descending,
                })
            })
            .collect()
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.descending { "desc" } else { "asc" };
        write!(f, "{} {dir}", self.column)
    }
}

/// Trait for SQL destinations.
///
/// Implementations guard a closed flag that every operation checks first,
/// so that a close in progress makes later calls fail fast with
/// [`bulk_core::BulkError::Closed`].
#[async_trait]
pub trait SqlAdapter: TypeMapping + Send + Sync {
    /// Backend type identifier, e.g. `postgres`.
    fn type_id(&self) -> &'static str;

    /// Reject bulk modes the destination cannot run.
    fn check_mode(&self, _mode: BulkMode) -> Result<()> {
        Ok(())
    }

    /// Create the destination namespace if it does not exist.
    async fn init_database(&self) -> Result<()>;

    /// Current shape of `table`, or `None` when it does not exist.
    async fn get_table_schema(&self, table: &str) -> Result<Option<Table>>;

    async fn create_table(&self, table: &Table) -> Result<()>;

    /// Add or widen columns; rows already written are kept.
    async fn patch_table(&self, table: &str, diff: &ColumnDiff) -> Result<()>;

    async fn drop_table(&self, table: &str, if_exists: bool) -> Result<()>;

    /// Write rows straight into `table`, committing immediately.
    async fn insert(&self, table: &Table, rows: &[Record], merge: bool) -> Result<()>;

    /// Run `ops` as one unit: either all take effect or none does.
    async fn execute_atomic(&self, ops: &[TableOp<'_>]) -> Result<LoadOutcome>;

    /// Read rows back. Verification path, not used while ingesting.
    async fn select(
        &self,
        table: &str,
        conditions: &[Condition],
        order_by: &[OrderBy],
    ) -> Result<Vec<Record>>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Name of a fresh staging table for `table`.
    fn staging_table_name(&self, table: &str) -> String {
        format!("{table}_tmp{}", chrono::Utc::now().format("%y%m%d%H%M%S%3f"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_parse_list() {
        let order = OrderBy::parse_list("id asc, name DESC,  created");
        assert_eq!(
            order,
            vec![OrderBy::asc("id"), OrderBy::desc("name"), OrderBy::asc("created")]
        );
        assert!(OrderBy::parse_list("").is_empty());
        assert_eq!(order[1].to_string(), "name desc");
    }

    #[test]
    fn test_condition_eq() {
        let cond = Condition::eq("id", 3i64);
        assert_eq!(cond.op.as_sql(), "=");
        assert_eq!(cond.value, Value::Int(3));
    }
}
