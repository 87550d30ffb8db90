//! In-process SQL destination.
//!
//! Behaves like a small SQL database: typed columns, primary keys, values
//! checked against their column type on write. Atomic units run against a
//! copy of the tables they touch; the copies replace the live tables only
//! when every operation succeeded, so readers never see a half-applied unit.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bulk_core::values::{parse_date, parse_timestamp};
use bulk_core::{
    primary_key_name, BulkError, BulkMode, Column, ColumnDiff, ErrorContext, LogicalType, Record,
    Result, Table, TypeMapping, Value, PARTITION_ID_COLUMN,
};
use indexmap::IndexMap;
use tracing::debug;

use crate::adapter::{CompareOp, Condition, LoadOutcome, OrderBy, SqlAdapter, TableOp};

pub const MEMORY_BULKER_TYPE: &str = "memory";

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: Table,
    rows: Vec<IndexMap<String, Value>>,
}

#[derive(Debug, Clone, Default)]
struct Database {
    tables: BTreeMap<String, MemoryTable>,
}

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    db: RwLock<Database>,
    closed: AtomicBool,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.db
            .read()
            .map(|db| db.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return Err(BulkError::Closed(MEMORY_BULKER_TYPE.to_string()));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Database>> {
        self.check_open()?;
        self.db.read().map_err(|e| poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Database>> {
        self.check_open()?;
        self.db.write().map_err(|e| poisoned(e.to_string()))
    }

    /// Apply `op` to a single database state.
    fn apply(db: &mut Database, op: &TableOp<'_>) -> Result<u64> {
        match *op {
            TableOp::Create(table) => {
                db.create(table)?;
                Ok(0)
            }
            TableOp::Patch { table, diff } => {
                db.patch(table, diff)?;
                Ok(0)
            }
            TableOp::Drop { table, if_exists } => {
                db.drop_table(table, if_exists)?;
                Ok(0)
            }
            TableOp::Rename { from, to } => {
                db.rename(&from.name, to)?;
                Ok(0)
            }
            TableOp::Insert { table, rows, merge } => db.insert(&table.name, rows, merge),
            TableOp::DeletePartition {
                table,
                partition_id,
            } => {
                let target = db.table_mut(table)?;
                target.rows.retain(|row| match row.get(PARTITION_ID_COLUMN) {
                    Some(Value::String(p)) => p != partition_id,
                    _ => true,
                });
                Ok(0)
            }
        }
    }
}

fn poisoned(message: String) -> BulkError {
    BulkError::stage_io(
        "memory database lock poisoned",
        ErrorContext::new(MEMORY_BULKER_TYPE),
        message,
    )
}

fn rejected(table: &str, statement: &str, message: impl Into<String>) -> BulkError {
    let message = message.into();
    BulkError::stage_io(
        format!("failed to execute {statement}"),
        ErrorContext::new(format!("{MEMORY_BULKER_TYPE}.{table}")).with_statement(statement),
        message,
    )
}

impl Database {
    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| rejected(name, "select", format!("relation \"{name}\" does not exist")))
    }

    fn create(&mut self, table: &Table) -> Result<()> {
        if self.tables.contains_key(&table.name) {
            return Err(rejected(
                &table.name,
                "create table",
                format!("relation \"{}\" already exists", table.name),
            ));
        }
        let mut schema = table.clone();
        for column in schema.columns.values_mut() {
            column.new = false;
        }
        self.tables.insert(
            table.name.clone(),
            MemoryTable {
                schema,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn patch(&mut self, name: &str, diff: &ColumnDiff) -> Result<()> {
        let target = self.table_mut(name)?;
        for (column_name, column) in &diff.added {
            if target.schema.columns.contains_key(column_name) {
                return Err(rejected(
                    name,
                    "alter table",
                    format!("column \"{column_name}\" of relation \"{name}\" already exists"),
                ));
            }
            target.schema.columns.insert(column_name.clone(), stored(column));
            for row in &mut target.rows {
                row.insert(column_name.clone(), Value::Null);
            }
        }
        for (column_name, column) in &diff.widened {
            let logical_type = logical_type_of(&column.data_type);
            for row in &mut target.rows {
                if let Some(value) = row.get_mut(column_name) {
                    let current = std::mem::replace(value, Value::Null);
                    *value = coerce(current, logical_type, &column.data_type)
                        .map_err(|m| rejected(name, "alter table", m))?;
                }
            }
            target.schema.columns.insert(column_name.clone(), stored(column));
        }
        Ok(())
    }

    fn drop_table(&mut self, name: &str, if_exists: bool) -> Result<()> {
        if self.tables.remove(name).is_none() && !if_exists {
            return Err(rejected(
                name,
                "drop table",
                format!("table \"{name}\" does not exist"),
            ));
        }
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if self.tables.contains_key(to) {
            return Err(rejected(
                to,
                "alter table rename",
                format!("relation \"{to}\" already exists"),
            ));
        }
        let mut table = self.tables.remove(from).ok_or_else(|| {
            rejected(from, "alter table rename", format!("relation \"{from}\" does not exist"))
        })?;
        table.schema.name = to.to_string();
        if table.schema.has_primary_key() {
            table.schema.primary_key_name = primary_key_name(to);
        }
        self.tables.insert(to.to_string(), table);
        Ok(())
    }

    fn insert(&mut self, name: &str, rows: &[Record], merge: bool) -> Result<u64> {
        let target = self.table_mut(name)?;
        for record in rows {
            let row = typed_row(&target.schema, record)?;
            let existing = if target.schema.has_primary_key() {
                target
                    .rows
                    .iter()
                    .position(|r| same_key(&target.schema, r, &row))
            } else {
                None
            };
            match existing {
                Some(pos) if merge => target.rows[pos] = row,
                Some(_) => {
                    return Err(rejected(
                        name,
                        "insert",
                        format!(
                            "duplicate key value violates unique constraint \"{}\"",
                            target.schema.primary_key_name
                        ),
                    ))
                }
                None => target.rows.push(row),
            }
        }
        Ok(rows.len() as u64)
    }
}

fn stored(column: &Column) -> Column {
    Column {
        new: false,
        ..column.clone()
    }
}

fn same_key(schema: &Table, a: &IndexMap<String, Value>, b: &IndexMap<String, Value>) -> bool {
    schema.pk_fields.iter().all(|pk| a.get(pk) == b.get(pk))
}

/// Record laid out as a row of `schema`, each value checked against its column.
fn typed_row(schema: &Table, record: &Record) -> Result<IndexMap<String, Value>> {
    if let Some(unknown) = record.keys().find(|k| !schema.columns.contains_key(*k)) {
        return Err(rejected(
            &schema.name,
            "insert",
            format!("column \"{unknown}\" of relation \"{}\" does not exist", schema.name),
        ));
    }

    let mut row = IndexMap::with_capacity(schema.columns.len());
    for (name, column) in &schema.columns {
        let value = record.get(name).cloned().unwrap_or(Value::Null);
        if value.is_null() && !column.nullable {
            return Err(rejected(
                &schema.name,
                "insert",
                format!("null value in column \"{name}\" violates not-null constraint"),
            ));
        }
        let logical_type = logical_type_of(&column.data_type);
        let value = coerce(value, logical_type, &column.data_type)
            .map_err(|m| rejected(&schema.name, "insert", m))?;
        row.insert(name.clone(), value);
    }
    Ok(row)
}

/// Store `value` in a column of `logical_type`, the way a SQL database casts
/// a text literal on insert.
fn coerce(
    value: Value,
    logical_type: LogicalType,
    data_type: &str,
) -> std::result::Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let invalid = |v: &Value| format!("invalid input syntax for type {data_type}: \"{v}\"");

    let coerced = match logical_type {
        LogicalType::String | LogicalType::Unknown => Some(Value::String(value.to_string())),
        LogicalType::Json => Some(Value::Json(value.to_json())),
        LogicalType::Boolean => match &value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::String(s) => match s.as_str() {
                "true" | "t" => Some(Value::Bool(true)),
                "false" | "f" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        LogicalType::Integer => match &value {
            Value::Int(i) => Some(Value::Int(*i)),
            Value::Number(n) => n.as_i64().map(Value::Int),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::Int),
            _ => None,
        },
        LogicalType::Float => match &value {
            Value::Float(f) => Some(Value::Float(*f)),
            Value::Int(i) => Some(Value::Float(*i as f64)),
            Value::Number(n) => n.as_f64().map(Value::Float),
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::Float),
            _ => None,
        },
        LogicalType::Timestamp => match &value {
            Value::Timestamp(ts) => Some(Value::Timestamp(*ts)),
            Value::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(|dt| Value::Timestamp(dt.and_utc())),
            Value::String(s) => parse_timestamp(s).map(Value::Timestamp),
            _ => None,
        },
        LogicalType::Date => match &value {
            Value::Date(d) => Some(Value::Date(*d)),
            Value::Timestamp(ts) => Some(Value::Date(ts.date_naive())),
            Value::String(s) => parse_date(s).map(Value::Date),
            _ => None,
        },
    };
    coerced.ok_or_else(|| invalid(&value))
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Int(x), Value::Float(y)) => (*x as f64).total_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.total_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn matches_condition(schema: &Table, row: &IndexMap<String, Value>, condition: &Condition) -> bool {
    let Some(value) = row.get(&condition.column) else {
        return false;
    };
    if value.is_null() {
        return false;
    }
    // Compare in the column's type, like a SQL engine casting the literal
    let expected = schema
        .columns
        .get(&condition.column)
        .map(|c| logical_type_of(&c.data_type))
        .and_then(|lt| coerce(condition.value.clone(), lt, "").ok())
        .unwrap_or_else(|| condition.value.clone());
    let ordering = compare(value, &expected);
    match condition.op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::NotEq => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::LtEq => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::GtEq => ordering != Ordering::Less,
    }
}

impl TypeMapping for MemoryAdapter {
    fn type_name(&self, logical_type: LogicalType) -> String {
        match logical_type {
            LogicalType::Boolean => "boolean",
            LogicalType::Integer => "bigint",
            LogicalType::Float => "double",
            LogicalType::Timestamp => "timestamp",
            LogicalType::Date => "date",
            LogicalType::Json => "json",
            LogicalType::String | LogicalType::Unknown => "text",
        }
        .to_string()
    }

    fn logical_type(&self, data_type: &str) -> LogicalType {
        logical_type_of(data_type)
    }
}

/// Column types outside the built-in set are stored as text.
fn logical_type_of(data_type: &str) -> LogicalType {
    match data_type.to_ascii_lowercase().as_str() {
        "boolean" => LogicalType::Boolean,
        "bigint" | "integer" | "int" => LogicalType::Integer,
        "double" | "float" | "real" => LogicalType::Float,
        "timestamp" => LogicalType::Timestamp,
        "date" => LogicalType::Date,
        "json" => LogicalType::Json,
        _ => LogicalType::String,
    }
}

#[async_trait]
impl SqlAdapter for MemoryAdapter {
    fn type_id(&self) -> &'static str {
        MEMORY_BULKER_TYPE
    }

    fn check_mode(&self, _mode: BulkMode) -> Result<()> {
        self.check_open()
    }

    async fn init_database(&self) -> Result<()> {
        self.check_open()
    }

    async fn get_table_schema(&self, table: &str) -> Result<Option<Table>> {
        let db = self.read()?;
        Ok(db.tables.get(table).map(|t| t.schema.clone()))
    }

    async fn create_table(&self, table: &Table) -> Result<()> {
        self.execute_atomic(&[TableOp::Create(table)]).await.map(|_| ())
    }

    async fn patch_table(&self, table: &str, diff: &ColumnDiff) -> Result<()> {
        self.execute_atomic(&[TableOp::Patch { table, diff }])
            .await
            .map(|_| ())
    }

    async fn drop_table(&self, table: &str, if_exists: bool) -> Result<()> {
        self.execute_atomic(&[TableOp::Drop { table, if_exists }])
            .await
            .map(|_| ())
    }

    async fn insert(&self, table: &Table, rows: &[Record], merge: bool) -> Result<()> {
        self.execute_atomic(&[TableOp::Insert { table, rows, merge }])
            .await
            .map(|_| ())
    }

    async fn execute_atomic(&self, ops: &[TableOp<'_>]) -> Result<LoadOutcome> {
        let mut live = self.write()?;

        // A single-row insert is checked in full before it mutates anything
        if let [TableOp::Insert {
            table,
            rows: rows @ [_],
            merge,
        }] = ops
        {
            let rows_written = live.insert(&table.name, rows, *merge)?;
            return Ok(LoadOutcome {
                rows_written,
                warnings: Vec::new(),
            });
        }

        let touched: BTreeSet<&str> = ops.iter().flat_map(TableOp::tables).collect();
        let mut scratch = Database {
            tables: touched
                .iter()
                .filter_map(|name| live.tables.get(*name).map(|t| (name.to_string(), t.clone())))
                .collect(),
        };
        let mut rows_written = 0;
        for op in ops {
            rows_written += Self::apply(&mut scratch, op)?;
        }
        for name in touched {
            match scratch.tables.remove(name) {
                Some(table) => {
                    live.tables.insert(name.to_string(), table);
                }
                None => {
                    live.tables.remove(name);
                }
            }
        }
        debug!("Applied {} operations atomically", ops.len());
        Ok(LoadOutcome {
            rows_written,
            warnings: Vec::new(),
        })
    }

    async fn select(
        &self,
        table: &str,
        conditions: &[Condition],
        order_by: &[OrderBy],
    ) -> Result<Vec<Record>> {
        let db = self.read()?;
        let source = db.tables.get(table).ok_or_else(|| {
            rejected(table, "select", format!("relation \"{table}\" does not exist"))
        })?;
        let mut rows: Vec<&IndexMap<String, Value>> = source
            .rows
            .iter()
            .filter(|row| conditions.iter().all(|c| matches_condition(&source.schema, row, c)))
            .collect();
        rows.sort_by(|a, b| {
            order_by
                .iter()
                .map(|o| {
                    let null = Value::Null;
                    let ord = compare(
                        a.get(&o.column).unwrap_or(&null),
                        b.get(&o.column).unwrap_or(&null),
                    );
                    if o.descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                })
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(rows
            .into_iter()
            .map(|row| row.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(data_type: &str, nullable: bool) -> Column {
        Column {
            data_type: data_type.to_string(),
            logical_type: logical_type_of(data_type),
            nullable,
            new: true,
        }
    }

    fn events_table() -> Table {
        Table::new("events")
            .with_primary_key(["id"])
            .with_column("id", column("bigint", false))
            .with_column("int1", column("bigint", true))
    }

    fn rec(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    #[tokio::test]
    async fn test_create_and_introspect() {
        let adapter = MemoryAdapter::new();
        adapter.create_table(&events_table()).await.unwrap();
        let table = adapter.get_table_schema("events").await.unwrap().unwrap();
        assert_eq!(table.primary_key_name, "events_pk");
        assert!(table.columns.values().all(|c| !c.new));
        assert!(adapter.get_table_schema("missing").await.unwrap().is_none());
        assert!(adapter.create_table(&events_table()).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_rejects_value_not_fitting_column() {
        let adapter = MemoryAdapter::new();
        let table = events_table();
        adapter.create_table(&table).await.unwrap();

        let rows = [rec(&[("id", Value::Int(1)), ("int1", Value::from("1.1"))])];
        let err = adapter.insert(&table, &rows, false).await.unwrap_err();
        assert!(
            err.to_string()
                .contains("invalid input syntax for type bigint: \"1.1\""),
            "{err}"
        );
        assert_eq!(err.context().unwrap().destination, "memory.events");

        let rows = [rec(&[("id", Value::Int(1)), ("int1", Value::from("7"))])];
        adapter.insert(&table, &rows, false).await.unwrap();
        let got = adapter.select("events", &[], &[]).await.unwrap();
        assert_eq!(got[0]["int1"], Value::Int(7));
    }

    #[tokio::test]
    async fn test_insert_enforces_primary_key() {
        let adapter = MemoryAdapter::new();
        let table = events_table();
        adapter.create_table(&table).await.unwrap();

        let first = [rec(&[("id", Value::Int(1)), ("int1", Value::Int(1))])];
        let second = [rec(&[("id", Value::Int(1)), ("int1", Value::Int(2))])];
        adapter.insert(&table, &first, false).await.unwrap();
        assert!(adapter.insert(&table, &second, false).await.is_err());
        adapter.insert(&table, &second, true).await.unwrap();

        let rows = adapter.select("events", &[], &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["int1"], Value::Int(2));

        let no_id = [rec(&[("int1", Value::Int(3))])];
        let err = adapter.insert(&table, &no_id, false).await.unwrap_err();
        assert!(err.to_string().contains("not-null"));
    }

    #[tokio::test]
    async fn test_failed_atomic_unit_leaves_state_untouched() {
        let adapter = MemoryAdapter::new();
        let table = events_table();
        let good = [rec(&[("id", Value::Int(1))])];
        let bad = [rec(&[("id", Value::from("x"))])];
        let ops = [
            TableOp::Create(&table),
            TableOp::Insert {
                table: &table,
                rows: &good,
                merge: false,
            },
            TableOp::Insert {
                table: &table,
                rows: &bad,
                merge: false,
            },
        ];
        assert!(adapter.execute_atomic(&ops).await.is_err());
        assert!(adapter.table_names().is_empty());
    }

    #[tokio::test]
    async fn test_atomic_unit_leaves_other_tables_alone() {
        let adapter = MemoryAdapter::new();
        let events = events_table();
        let other = events_table().clone_named("other");
        adapter.create_table(&events).await.unwrap();
        adapter.create_table(&other).await.unwrap();
        let row = [rec(&[("id", Value::Int(1))])];
        adapter.insert(&other, &row, false).await.unwrap();

        let bad = [rec(&[("id", Value::Int(2))]), rec(&[("id", Value::from("x"))])];
        let failing = [TableOp::Insert {
            table: &events,
            rows: &bad,
            merge: false,
        }];
        assert!(adapter.execute_atomic(&failing).await.is_err());
        assert!(adapter.select("events", &[], &[]).await.unwrap().is_empty());

        let replace = [
            TableOp::Drop {
                table: "events",
                if_exists: false,
            },
            TableOp::Rename {
                from: &other,
                to: "events",
            },
        ];
        adapter.execute_atomic(&replace).await.unwrap();
        assert_eq!(adapter.table_names(), vec!["events".to_string()]);
        assert_eq!(adapter.select("events", &[], &[]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_single_row_insert_changes_nothing() {
        let adapter = MemoryAdapter::new();
        let table = events_table();
        adapter.create_table(&table).await.unwrap();
        adapter
            .insert(&table, &[rec(&[("id", Value::Int(1)), ("int1", Value::Int(1))])], true)
            .await
            .unwrap();

        let clash = [rec(&[("id", Value::Int(1)), ("int1", Value::from("1.1"))])];
        assert!(adapter.insert(&table, &clash, true).await.is_err());
        let rows = adapter.select("events", &[], &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["int1"], Value::Int(1));
    }

    #[tokio::test]
    async fn test_patch_adds_and_widens() {
        let adapter = MemoryAdapter::new();
        let table = events_table();
        adapter.create_table(&table).await.unwrap();
        adapter
            .insert(&table, &[rec(&[("id", Value::Int(1)), ("int1", Value::Int(5))])], false)
            .await
            .unwrap();

        let mut diff = ColumnDiff::default();
        diff.added.insert("name".into(), column("text", true));
        diff.widened.insert("int1".into(), column("text", true));
        adapter.patch_table("events", &diff).await.unwrap();

        let table = adapter.get_table_schema("events").await.unwrap().unwrap();
        assert_eq!(table.column_names(), vec!["id", "int1", "name"]);
        let rows = adapter.select("events", &[], &[]).await.unwrap();
        assert_eq!(rows[0]["int1"], Value::from("5"));
        assert_eq!(rows[0]["name"], Value::Null);
    }

    #[tokio::test]
    async fn test_rename_moves_constraint() {
        let adapter = MemoryAdapter::new();
        let staging = events_table().clone_named("events_tmp");
        adapter.create_table(&staging).await.unwrap();
        adapter
            .execute_atomic(&[TableOp::Rename {
                from: &staging,
                to: "events",
            }])
            .await
            .unwrap();
        let table = adapter.get_table_schema("events").await.unwrap().unwrap();
        assert_eq!(table.name, "events");
        assert_eq!(table.primary_key_name, "events_pk");
        assert_eq!(adapter.table_names(), vec!["events".to_string()]);
    }

    #[tokio::test]
    async fn test_select_conditions_and_order() {
        let adapter = MemoryAdapter::new();
        let table = Table::new("t")
            .with_column("id", column("bigint", true))
            .with_column("name", column("text", true));
        adapter.create_table(&table).await.unwrap();
        let rows: Vec<Record> = [(3, "c"), (1, "a"), (2, "b")]
            .into_iter()
            .map(|(id, name)| rec(&[("id", Value::Int(id)), ("name", Value::from(name))]))
            .collect();
        adapter.insert(&table, &rows, false).await.unwrap();

        let got = adapter
            .select("t", &[Condition::new("id", CompareOp::GtEq, "2")], &[OrderBy::desc("id")])
            .await
            .unwrap();
        let names: Vec<Value> = got.into_iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![Value::from("c"), Value::from("b")]);
    }

    #[tokio::test]
    async fn test_closed_adapter_fails_fast() {
        let adapter = MemoryAdapter::new();
        adapter.close().await.unwrap();
        assert!(adapter.is_closed());
        assert!(matches!(
            adapter.get_table_schema("t").await,
            Err(BulkError::Closed(_))
        ));
        assert!(matches!(
            adapter.check_mode(BulkMode::AutoCommit),
            Err(BulkError::Closed(_))
        ));
    }
}
