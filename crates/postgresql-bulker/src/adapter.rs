//! PostgreSQL adapter.
//!
//! One `tokio_postgres::Client` is shared by every stream of a destination.
//! The client sits behind an async mutex and a closed flag; `close` flips
//! the flag first, so operations racing a close fail fast instead of
//! touching a connection that is being torn down.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bulk_core::{
    intercept, BulkError, Column, ColumnDiff, ErrorContext, LogicalType, Record, Result, Table,
    TypeMapping, Value,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sql_bulker::{Condition, LoadOutcome, OrderBy, SqlAdapter, TableOp};
use tokio::sync::Mutex;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, GenericClient, NoTls, Row};
use tracing::{debug, error, info};

use crate::config::PostgresConfig;
use crate::dialect::{PostgreSQLDialect, COLUMNS_QUERY, PRIMARY_KEY_QUERY};

pub const POSTGRES_BULKER_TYPE: &str = "postgres";

pub struct PostgresAdapter {
    config: PostgresConfig,
    dialect: PostgreSQLDialect,
    client: Mutex<Option<Client>>,
    closed: AtomicBool,
}

impl PostgresAdapter {
    /// Validate `config` and open a connection.
    pub async fn connect(config: PostgresConfig) -> Result<Self> {
        config.validate()?;
        let context = ErrorContext::new(format!("{}/{}", config.host, config.database));
        let (client, connection) = tokio_postgres::connect(&config.connection_string(), NoTls)
            .await
            .map_err(|e| BulkError::stage_io("failed to connect to PostgreSQL", context, pg_cause(&e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {e}");
            }
        });

        info!(
            "Connected to PostgreSQL at {}:{}/{} (schema {})",
            config.host, config.port, config.database, config.schema
        );
        Ok(Self {
            config,
            dialect: PostgreSQLDialect,
            client: Mutex::new(Some(client)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    fn schema(&self) -> &str {
        &self.config.schema
    }

    fn context(&self, table: &str) -> ErrorContext {
        ErrorContext::new(format!("{}.{}", self.config.schema, table))
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BulkError::Closed(POSTGRES_BULKER_TYPE.to_string()));
        }
        Ok(())
    }

    async fn execute_op<C>(&self, client: &C, op: &TableOp<'_>) -> Result<u64>
    where
        C: GenericClient + Sync,
    {
        let schema = self.schema();
        match *op {
            TableOp::Create(table) => {
                let sql = self.dialect.create_table(schema, table);
                run(client, &self.context(&table.name), sql).await?;
                Ok(0)
            }
            TableOp::Patch { table, diff } => {
                if let Some(sql) = self.dialect.alter_table(schema, table, diff) {
                    run(client, &self.context(table), sql).await?;
                }
                Ok(0)
            }
            TableOp::Drop { table, if_exists } => {
                let sql = self.dialect.drop_table(schema, table, if_exists);
                run(client, &self.context(table), sql).await?;
                Ok(0)
            }
            TableOp::Rename { from, to } => {
                for sql in self.dialect.rename_table(schema, from, to) {
                    run(client, &self.context(&from.name), sql).await?;
                }
                Ok(0)
            }
            TableOp::Insert { table, rows, merge } => self.insert_rows(client, table, rows, merge).await,
            TableOp::DeletePartition {
                table,
                partition_id,
            } => {
                let sql = self.dialect.delete_partition(schema, table);
                let context = self.context(table).with_statement(sql.clone());
                debug!("{sql}");
                let deleted = client
                    .execute(sql.as_str(), &[&partition_id])
                    .await
                    .map_err(|e| BulkError::stage_io("failed to delete partition", context, pg_cause(&e)))?;
                debug!("Deleted {deleted} rows of partition '{partition_id}' from {table}");
                Ok(0)
            }
        }
    }

    async fn insert_rows<C>(&self, client: &C, table: &Table, rows: &[Record], merge: bool) -> Result<u64>
    where
        C: GenericClient + Sync,
    {
        if let Some(unknown) = rows
            .iter()
            .flat_map(|r| r.keys())
            .find(|k| !table.columns.contains_key(*k))
        {
            return Err(BulkError::schema_conflict(
                &table.name,
                format!("column '{unknown}' is not part of the table"),
            ));
        }

        let chunk_size = self.dialect.rows_per_statement(table.columns.len());
        for chunk in rows.chunks(chunk_size) {
            let sql = self.dialect.insert(self.schema(), table, chunk.len(), merge);
            let values: Vec<Option<String>> = chunk
                .iter()
                .flat_map(|row| table.columns.keys().map(move |c| row.get(c).and_then(text_param)))
                .collect();
            let params: Vec<&(dyn ToSql + Sync)> =
                values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

            client.execute(sql.as_str(), &params).await.map_err(|e| {
                BulkError::stage_io(
                    format!("failed to insert {} rows", chunk.len()),
                    self.context(&table.name),
                    pg_cause(&e),
                )
            })?;
        }
        Ok(rows.len() as u64)
    }

    async fn fetch_table(&self, client: &Client, name: &str) -> Result<Option<Table>> {
        let context = self.context(name).with_statement("introspect table");
        let columns = client
            .query(COLUMNS_QUERY, &[&self.schema(), &name])
            .await
            .map_err(|e| BulkError::stage_io("failed to read table columns", context.clone(), pg_cause(&e)))?;
        if columns.is_empty() {
            return Ok(None);
        }

        let mut table = Table::new(name);
        for row in &columns {
            let column_name: String = row.get(0);
            let data_type: String = row.get(1);
            let is_nullable: String = row.get(2);
            table.columns.insert(
                column_name,
                Column {
                    logical_type: self.dialect.logical_type(&data_type),
                    data_type,
                    nullable: is_nullable == "YES",
                    new: false,
                },
            );
        }

        let pk_rows = client
            .query(PRIMARY_KEY_QUERY, &[&self.schema(), &name])
            .await
            .map_err(|e| BulkError::stage_io("failed to read primary key", context, pg_cause(&e)))?;
        for row in &pk_rows {
            let constraint: String = row.get(0);
            let column: String = row.get(1);
            table.primary_key_name = constraint;
            table.pk_fields.insert(column);
        }
        Ok(Some(table))
    }
}

async fn run<C>(client: &C, context: &ErrorContext, sql: String) -> Result<()>
where
    C: GenericClient + Sync,
{
    debug!("{sql}");
    client.batch_execute(&sql).await.map_err(|e| {
        BulkError::stage_io(
            "failed to execute statement",
            context.clone().with_statement(sql.clone()),
            pg_cause(&e),
        )
    })
}

/// Server message with its SQLSTATE when there is one.
fn pg_cause(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format!("{} {}", db.code().code(), db.message()),
        None => e.to_string(),
    }
}

fn text_param(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn decode_row(row: &Row) -> Result<Record> {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, i, column.type_()).map_err(|e| {
            BulkError::stage_io(
                format!("failed to decode column '{}'", column.name()),
                ErrorContext::new(POSTGRES_BULKER_TYPE),
                e,
            )
        })?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn decode_value(row: &Row, i: usize, ty: &Type) -> std::result::Result<Value, tokio_postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(i)?.map(Value::Bool),
        Type::INT2 => row.try_get::<_, Option<i16>>(i)?.map(|v| Value::Int(v.into())),
        Type::INT4 => row.try_get::<_, Option<i32>>(i)?.map(|v| Value::Int(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(i)?.map(Value::Int),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(i)?.map(|v| Value::Float(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(i)?.map(Value::Float),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(i)?
            .map(Value::Timestamp),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(i)?
            .map(|v| Value::Timestamp(v.and_utc())),
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(i)?.map(Value::Date),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(i)?
            .map(Value::Json),
        _ => row.try_get::<_, Option<String>>(i)?.map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

impl TypeMapping for PostgresAdapter {
    fn type_name(&self, logical_type: LogicalType) -> String {
        self.dialect.type_name(logical_type)
    }

    fn logical_type(&self, data_type: &str) -> LogicalType {
        self.dialect.logical_type(data_type)
    }
}

#[async_trait]
impl SqlAdapter for PostgresAdapter {
    fn type_id(&self) -> &'static str {
        POSTGRES_BULKER_TYPE
    }

    async fn init_database(&self) -> Result<()> {
        self.check_open()?;
        let sql = self.dialect.create_schema(self.schema());
        let context = ErrorContext::new(self.schema());
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| BulkError::Closed(POSTGRES_BULKER_TYPE.to_string()))?;
        intercept(&context, "creating schema", run(client, &context, sql)).await
    }

    async fn get_table_schema(&self, table: &str) -> Result<Option<Table>> {
        self.check_open()?;
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| BulkError::Closed(POSTGRES_BULKER_TYPE.to_string()))?;
        intercept(&self.context(table), "reading table schema", self.fetch_table(client, table)).await
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
        self.check_open()?;
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| BulkError::Closed(POSTGRES_BULKER_TYPE.to_string()))?;
        intercept(
            &self.context(&table.name),
            "inserting rows",
            self.insert_rows(client, table, rows, merge),
        )
        .await
        .map(|_| ())
    }

    async fn execute_atomic(&self, ops: &[TableOp<'_>]) -> Result<LoadOutcome> {
        self.check_open()?;
        let context = ErrorContext::new(self.schema()).with_statement("transaction");
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| BulkError::Closed(POSTGRES_BULKER_TYPE.to_string()))?;

        intercept(&context, "executing transaction", async {
            let tx = client.transaction().await.map_err(|e| {
                BulkError::stage_io("failed to begin transaction", context.clone(), pg_cause(&e))
            })?;
            let mut outcome = LoadOutcome::default();
            for op in ops {
                // Dropping `tx` on error rolls the transaction back
                outcome.rows_written += self.execute_op(&tx, op).await?;
            }
            tx.commit().await.map_err(|e| {
                BulkError::stage_io("failed to commit transaction", context.clone(), pg_cause(&e))
            })?;
            Ok(outcome)
        })
        .await
    }

    async fn select(
        &self,
        table: &str,
        conditions: &[Condition],
        order_by: &[OrderBy],
    ) -> Result<Vec<Record>> {
        self.check_open()?;
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| BulkError::Closed(POSTGRES_BULKER_TYPE.to_string()))?;
        let context = self.context(table);

        intercept(&context, "selecting rows", async {
            let schema = self.fetch_table(client, table).await?.ok_or_else(|| {
                BulkError::schema_conflict(table, "table does not exist")
            })?;
            let sql = self.dialect.select(self.schema(), &schema, conditions, order_by);
            let values: Vec<Option<String>> =
                conditions.iter().map(|c| text_param(&c.value)).collect();
            let params: Vec<&(dyn ToSql + Sync)> =
                values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            let rows = client.query(sql.as_str(), &params).await.map_err(|e| {
                BulkError::stage_io("failed to select rows", context.clone().with_statement(sql.clone()), pg_cause(&e))
            })?;
            rows.iter().map(decode_row).collect()
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the client ends the connection task
        self.client.lock().await.take();
        info!("Closed PostgreSQL adapter for {}", self.config.database);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// PostgreSQL truncates identifiers longer than 63 bytes.
    fn staging_table_name(&self, table: &str) -> String {
        let suffix = format!("_tmp{}", Utc::now().format("%y%m%d%H%M%S%3f"));
        let mut base = table.to_string();
        while base.len() + suffix.len() > 63 {
            base.pop();
        }
        format!("{base}{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_param() {
        assert_eq!(text_param(&Value::Null), None);
        assert_eq!(text_param(&Value::Float(1.1)).as_deref(), Some("1.1"));
        assert_eq!(
            text_param(&Value::Json(serde_json::json!({"a": 1}))).as_deref(),
            Some("{\"a\":1}")
        );
        let ts = "2022-08-18T14:17:22.841182Z";
        let value = bulk_core::values::reformat(Value::from(ts));
        assert_eq!(text_param(&value).as_deref(), Some(ts));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let config = PostgresConfig {
            host: String::new(),
            port: 5432,
            database: "d".into(),
            username: "u".into(),
            password: String::new(),
            schema: "public".into(),
            parameters: Default::default(),
        };
        assert!(matches!(
            PostgresAdapter::connect(config).await,
            Err(BulkError::Config(_))
        ));
    }
}
