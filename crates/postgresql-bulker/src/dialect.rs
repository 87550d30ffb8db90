//! PostgreSQL SQL generation.
//!
//! Statement text only; the adapter binds parameters and runs them. Every
//! value is bound as text and cast to its column type by the server, so a
//! value that does not fit its column is rejected with PostgreSQL's own
//! message, e.g. `invalid input syntax for type bigint: "1.1"`.

use bulk_core::{ColumnDiff, LogicalType, Table, TypeMapping, PARTITION_ID_COLUMN};
use sql_bulker::{Condition, OrderBy};

/// Upper bound of bind parameters in one statement.
pub const MAX_PARAMETERS: usize = 65535;

/// Columns with their declared type as `format_type` renders it, so arrays,
/// enums and modifiers come back as usable DDL (`text[]`, `numeric(10,2)`).
pub const COLUMNS_QUERY: &str = "SELECT a.attname::text, format_type(a.atttypid, a.atttypmod), \
     CASE WHEN a.attnotnull THEN 'NO' ELSE 'YES' END \
     FROM pg_catalog.pg_attribute a \
     JOIN pg_catalog.pg_class c ON c.oid = a.attrelid \
     JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
     WHERE n.nspname::text = $1 AND c.relname::text = $2 AND c.relkind IN ('r', 'p') \
       AND a.attnum > 0 AND NOT a.attisdropped \
     ORDER BY a.attnum";

pub const PRIMARY_KEY_QUERY: &str = "SELECT tc.constraint_name::text, kcu.column_name::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_name = kcu.constraint_name \
      AND tc.table_schema = kcu.table_schema \
      AND tc.table_name = kcu.table_name \
     WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema::text = $1 AND tc.table_name::text = $2 \
     ORDER BY kcu.ordinal_position";

/// PostgreSQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgreSQLDialect;

impl TypeMapping for PostgreSQLDialect {
    fn type_name(&self, logical_type: LogicalType) -> String {
        match logical_type {
            LogicalType::Boolean => "boolean",
            LogicalType::Integer => "bigint",
            LogicalType::Float => "double precision",
            LogicalType::Timestamp => "timestamp with time zone",
            LogicalType::Date => "date",
            LogicalType::Json => "jsonb",
            LogicalType::String | LogicalType::Unknown => "text",
        }
        .to_string()
    }

    fn logical_type(&self, data_type: &str) -> LogicalType {
        let lower = data_type.to_lowercase();
        if lower.ends_with("[]") {
            return LogicalType::String;
        }
        let base = lower.split('(').next().unwrap_or_default().trim();
        match base {
            "boolean" | "bool" => LogicalType::Boolean,
            "smallint" | "integer" | "int" | "bigint" | "int2" | "int4" | "int8" => {
                LogicalType::Integer
            }
            "real" | "double precision" | "float4" | "float8" | "numeric" | "decimal" => {
                LogicalType::Float
            }
            "timestamp" | "timestamptz" | "timestamp with time zone"
            | "timestamp without time zone" => LogicalType::Timestamp,
            "date" => LogicalType::Date,
            "json" | "jsonb" => LogicalType::Json,
            _ => LogicalType::String,
        }
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl PostgreSQLDialect {
    pub fn qualified(&self, schema: &str, table: &str) -> String {
        format!("{}.{}", quote_ident(schema), quote_ident(table))
    }

    pub fn create_schema(&self, schema: &str) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
    }

    pub fn create_table(&self, schema: &str, table: &Table) -> String {
        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|(name, column)| {
                let null_clause = if column.nullable { "" } else { " NOT NULL" };
                format!("{} {}{}", quote_ident(name), column.data_type, null_clause)
            })
            .collect();
        if table.has_primary_key() {
            let pk: Vec<String> = table.pk_fields.iter().map(|c| quote_ident(c)).collect();
            defs.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                quote_ident(&table.primary_key_name),
                pk.join(", ")
            ));
        }
        format!(
            "CREATE TABLE {} ({})",
            self.qualified(schema, &table.name),
            defs.join(", ")
        )
    }

    /// One `ALTER TABLE` adding and widening columns, or `None` for an empty diff.
    pub fn alter_table(&self, schema: &str, table: &str, diff: &ColumnDiff) -> Option<String> {
        let added = diff.added.iter().map(|(name, column)| {
            format!("ADD COLUMN {} {}", quote_ident(name), column.data_type)
        });
        let widened = diff.widened.iter().map(|(name, column)| {
            let ident = quote_ident(name);
            format!(
                "ALTER COLUMN {ident} TYPE {ty} USING {ident}::{ty}",
                ty = column.data_type
            )
        });
        let actions: Vec<String> = added.chain(widened).collect();
        if actions.is_empty() {
            return None;
        }
        Some(format!(
            "ALTER TABLE {} {}",
            self.qualified(schema, table),
            actions.join(", ")
        ))
    }

    pub fn drop_table(&self, schema: &str, table: &str, if_exists: bool) -> String {
        let if_exists = if if_exists { "IF EXISTS " } else { "" };
        format!("DROP TABLE {if_exists}{}", self.qualified(schema, table))
    }

    /// Rename `from` to `to`, carrying the primary key constraint name along.
    pub fn rename_table(&self, schema: &str, from: &Table, to: &str) -> Vec<String> {
        let mut statements = vec![format!(
            "ALTER TABLE {} RENAME TO {}",
            self.qualified(schema, &from.name),
            quote_ident(to)
        )];
        if from.has_primary_key() {
            statements.push(format!(
                "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
                self.qualified(schema, to),
                quote_ident(&from.primary_key_name),
                quote_ident(&bulk_core::primary_key_name(to))
            ));
        }
        statements
    }

    /// Multi-row insert of `rows` rows over all columns of `table`.
    ///
    /// Parameters are numbered row by row, column by column.
    pub fn insert(&self, schema: &str, table: &Table, rows: usize, merge: bool) -> String {
        let columns: Vec<String> = table.columns.keys().map(|c| quote_ident(c)).collect();
        let types: Vec<&str> = table.columns.values().map(|c| c.data_type.as_str()).collect();

        let values: Vec<String> = (0..rows)
            .map(|row| {
                let casts: Vec<String> = types
                    .iter()
                    .enumerate()
                    .map(|(i, ty)| format!("CAST(${}::text AS {ty})", row * types.len() + i + 1))
                    .collect();
                format!("({})", casts.join(", "))
            })
            .collect();

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.qualified(schema, &table.name),
            columns.join(", "),
            values.join(", ")
        );
        if merge && table.has_primary_key() {
            let updates: Vec<String> = table
                .columns
                .keys()
                .filter(|c| !table.pk_fields.contains(*c))
                .map(|c| format!("{ident} = EXCLUDED.{ident}", ident = quote_ident(c)))
                .collect();
            let constraint = quote_ident(&table.primary_key_name);
            if updates.is_empty() {
                sql.push_str(&format!(" ON CONFLICT ON CONSTRAINT {constraint} DO NOTHING"));
            } else {
                sql.push_str(&format!(
                    " ON CONFLICT ON CONSTRAINT {constraint} DO UPDATE SET {}",
                    updates.join(", ")
                ));
            }
        }
        sql
    }

    /// Rows per insert statement so that the parameter count stays in bounds.
    pub fn rows_per_statement(&self, columns: usize) -> usize {
        (MAX_PARAMETERS / columns.max(1)).max(1)
    }

    pub fn delete_partition(&self, schema: &str, table: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {}::text = $1",
            self.qualified(schema, table),
            quote_ident(PARTITION_ID_COLUMN)
        )
    }

    /// Select over the columns of `table`. Conditions bind their values as
    /// text, cast to the column type.
    pub fn select(
        &self,
        schema: &str,
        table: &Table,
        conditions: &[Condition],
        order_by: &[OrderBy],
    ) -> String {
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|(name, column)| {
                let ident = quote_ident(name);
                if self.decodes_natively(&column.data_type) {
                    ident
                } else {
                    format!("{ident}::text AS {ident}")
                }
            })
            .collect();

        let mut sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            self.qualified(schema, &table.name)
        );
        if !conditions.is_empty() {
            let predicates: Vec<String> = conditions
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    let ty = table
                        .columns
                        .get(&c.column)
                        .map(|col| col.data_type.as_str())
                        .unwrap_or("text");
                    format!(
                        "{} {} CAST(${}::text AS {ty})",
                        quote_ident(&c.column),
                        c.op.as_sql(),
                        i + 1
                    )
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        if !order_by.is_empty() {
            let order: Vec<String> = order_by
                .iter()
                .map(|o| {
                    let dir = if o.descending { "DESC" } else { "ASC" };
                    format!("{} {dir}", quote_ident(&o.column))
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        sql
    }

    /// Whether a column of this type is read back without a text cast.
    fn decodes_natively(&self, data_type: &str) -> bool {
        matches!(
            data_type.to_lowercase().as_str(),
            "boolean"
                | "bool"
                | "smallint"
                | "integer"
                | "bigint"
                | "real"
                | "double precision"
                | "text"
                | "character varying"
                | "timestamp with time zone"
                | "timestamp without time zone"
                | "date"
                | "json"
                | "jsonb"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulk_core::{Column, Field};

    fn column(data_type: &str, nullable: bool) -> Column {
        Column {
            data_type: data_type.to_string(),
            logical_type: PostgreSQLDialect.logical_type(data_type),
            nullable,
            new: true,
        }
    }

    fn events() -> Table {
        Table::new("events")
            .with_primary_key(["id"])
            .with_column("id", column("bigint", false))
            .with_column("name", column("text", true))
    }

    #[test]
    fn test_type_names() {
        let d = PostgreSQLDialect;
        assert_eq!(d.type_name(LogicalType::Integer), "bigint");
        assert_eq!(d.type_name(LogicalType::Float), "double precision");
        assert_eq!(d.type_name(LogicalType::Timestamp), "timestamp with time zone");
        assert_eq!(d.type_name(LogicalType::Json), "jsonb");
        assert_eq!(d.type_name(LogicalType::Unknown), "text");
        assert_eq!(
            d.column_type(&Field::new(LogicalType::Float).with_sql_type("numeric(10,2)")),
            "numeric(10,2)"
        );
    }

    #[test]
    fn test_logical_type_from_format_type() {
        let d = PostgreSQLDialect;
        assert_eq!(d.logical_type("bigint"), LogicalType::Integer);
        assert_eq!(d.logical_type("double precision"), LogicalType::Float);
        assert_eq!(d.logical_type("numeric(10,2)"), LogicalType::Float);
        assert_eq!(d.logical_type("timestamp with time zone"), LogicalType::Timestamp);
        assert_eq!(d.logical_type("timestamp(3) with time zone"), LogicalType::Timestamp);
        assert_eq!(d.logical_type("character varying(255)"), LogicalType::String);
        assert_eq!(d.logical_type("jsonb"), LogicalType::Json);
        assert_eq!(d.logical_type("bigint[]"), LogicalType::String);
        assert_eq!(d.logical_type("mood"), LogicalType::String);
    }

    #[test]
    fn test_columns_query_reads_declared_types() {
        assert!(COLUMNS_QUERY.contains("format_type(a.atttypid, a.atttypmod)"));
        assert!(!COLUMNS_QUERY.contains("data_type"));
        assert!(COLUMNS_QUERY.contains("NOT a.attisdropped"));
    }

    #[test]
    fn test_array_columns_are_read_back_as_text() {
        let table = events().with_column("tags", column("text[]", true));
        let sql = PostgreSQLDialect.select("public", &table, &[], &[]);
        assert!(sql.contains("\"tags\"::text AS \"tags\""), "{sql}");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_create_table() {
        assert_eq!(
            PostgreSQLDialect.create_table("public", &events()),
            "CREATE TABLE \"public\".\"events\" (\"id\" bigint NOT NULL, \"name\" text, \
             CONSTRAINT \"events_pk\" PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn test_alter_table() {
        let mut diff = ColumnDiff::default();
        assert!(PostgreSQLDialect.alter_table("s", "t", &diff).is_none());

        diff.added.insert("c1".into(), column("text", true));
        diff.widened.insert("n".into(), column("double precision", true));
        assert_eq!(
            PostgreSQLDialect.alter_table("s", "t", &diff).unwrap(),
            "ALTER TABLE \"s\".\"t\" ADD COLUMN \"c1\" text, \
             ALTER COLUMN \"n\" TYPE double precision USING \"n\"::double precision"
        );
    }

    #[test]
    fn test_insert_casts_text_parameters() {
        assert_eq!(
            PostgreSQLDialect.insert("public", &events(), 2, false),
            "INSERT INTO \"public\".\"events\" (\"id\", \"name\") VALUES \
             (CAST($1::text AS bigint), CAST($2::text AS text)), \
             (CAST($3::text AS bigint), CAST($4::text AS text))"
        );
    }

    #[test]
    fn test_insert_merge() {
        let sql = PostgreSQLDialect.insert("public", &events(), 1, true);
        assert!(sql.ends_with(
            "ON CONFLICT ON CONSTRAINT \"events_pk\" DO UPDATE SET \"name\" = EXCLUDED.\"name\""
        ));

        let only_pk = Table::new("k")
            .with_primary_key(["id"])
            .with_column("id", column("bigint", false));
        assert!(PostgreSQLDialect
            .insert("public", &only_pk, 1, true)
            .ends_with("DO NOTHING"));
    }

    #[test]
    fn test_rename_table_renames_constraint() {
        let staging = events().clone_named("events_tmp1");
        assert_eq!(
            PostgreSQLDialect.rename_table("public", &staging, "events"),
            vec![
                "ALTER TABLE \"public\".\"events_tmp1\" RENAME TO \"events\"".to_string(),
                "ALTER TABLE \"public\".\"events\" RENAME CONSTRAINT \"events_tmp1_pk\" TO \"events_pk\""
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_rows_per_statement() {
        let d = PostgreSQLDialect;
        assert_eq!(d.rows_per_statement(3), 21845);
        assert_eq!(d.rows_per_statement(0), MAX_PARAMETERS);
        assert_eq!(d.rows_per_statement(100_000), 1);
    }

    #[test]
    fn test_select() {
        let table = events().with_column("amount", column("numeric(10,2)", true));
        let sql = PostgreSQLDialect.select(
            "public",
            &table,
            &[Condition::eq("id", 1i64)],
            &[OrderBy::asc("id"), OrderBy::desc("name")],
        );
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\", \"amount\"::text AS \"amount\" FROM \"public\".\"events\" \
             WHERE \"id\" = CAST($1::text AS bigint) ORDER BY \"id\" ASC, \"name\" DESC"
        );
    }

    #[test]
    fn test_delete_partition() {
        assert_eq!(
            PostgreSQLDialect.delete_partition("public", "events"),
            "DELETE FROM \"public\".\"events\" WHERE \"__partition_id\"::text = $1"
        );
    }
}
