//! Schema model and reconciler.
//!
//! A [`Table`] is the destination's current shape, a [`Fields`] map is what a
//! batch needs. [`reconcile`] computes what must change before the batch can
//! be written: a fresh table, a patch that adds or widens columns, or nothing.
//! Columns are never removed.

use std::collections::HashMap;
use std::ops::Deref;

use indexmap::{IndexMap, IndexSet};

use crate::error::{BulkError, Result};
use crate::types::LogicalType;
use crate::values::Record;

/// A resolved field of one record or a merged batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub logical_type: LogicalType,
    /// Backend type to use verbatim instead of deriving one from `logical_type`.
    pub sql_type: Option<String>,
    pub nullable: bool,
}

impl Field {
    pub fn new(logical_type: LogicalType) -> Self {
        Self {
            logical_type,
            sql_type: None,
            nullable: true,
        }
    }

    pub fn with_sql_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }
}

/// Field name to resolved field, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(IndexMap<String, Field>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, field: Field) {
        self.0.insert(name.into(), field);
    }

    /// Union with `other`. Types only ever widen; the first explicit SQL type
    /// seen for a field sticks.
    pub fn merge(&mut self, other: Fields) {
        for (name, field) in other.0 {
            match self.0.get_mut(&name) {
                Some(existing) => {
                    existing.logical_type = existing.logical_type.widen(field.logical_type);
                    if existing.sql_type.is_none() {
                        existing.sql_type = field.sql_type;
                    }
                    existing.nullable |= field.nullable;
                }
                None => {
                    self.0.insert(name, field);
                }
            }
        }
    }
}

impl Deref for Fields {
    type Target = IndexMap<String, Field>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<(String, Field)> for Fields {
    fn from_iter<T: IntoIterator<Item = (String, Field)>>(iter: T) -> Self {
        Fields(iter.into_iter().collect())
    }
}

/// Column descriptor as known to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Backend type name, e.g. `bigint`.
    pub data_type: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
    /// Not yet present in the destination.
    pub new: bool,
}

/// Destination table snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    /// Name of the primary key constraint; empty when there is no primary key.
    pub primary_key_name: String,
    pub pk_fields: IndexSet<String>,
    pub columns: IndexMap<String, Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key_name: String::new(),
            pk_fields: IndexSet::new(),
            columns: IndexMap::new(),
        }
    }

    pub fn with_primary_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pk_fields = fields.into_iter().map(Into::into).collect();
        self.primary_key_name = if self.pk_fields.is_empty() {
            String::new()
        } else {
            primary_key_name(&self.name)
        };
        self
    }

    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Self {
        self.columns.insert(name.into(), column);
        self
    }

    /// Same shape under another name, with a primary key constraint named
    /// after the new table. Used for staging tables.
    pub fn clone_named(&self, name: impl Into<String>) -> Table {
        let name = name.into();
        let primary_key_name = if self.pk_fields.is_empty() {
            String::new()
        } else {
            primary_key_name(&name)
        };
        Table {
            name,
            primary_key_name,
            pk_fields: self.pk_fields.clone(),
            columns: self.columns.clone(),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    pub fn has_primary_key(&self) -> bool {
        !self.pk_fields.is_empty()
    }
}

/// Primary key constraint name for `table`.
pub fn primary_key_name(table: &str) -> String {
    format!("{table}_pk")
}

/// Mapping between logical types and a backend's column types.
pub trait TypeMapping {
    /// Column type used for a logical type.
    fn type_name(&self, logical_type: LogicalType) -> String;

    /// Logical type of an introspected column type.
    fn logical_type(&self, data_type: &str) -> LogicalType;

    /// Column type for a resolved field; an explicit SQL type wins.
    fn column_type(&self, field: &Field) -> String {
        match &field.sql_type {
            Some(sql_type) => sql_type.clone(),
            None => self.type_name(field.logical_type),
        }
    }
}

/// What the stream asks of the table it writes to.
#[derive(Debug, Clone, Default)]
pub struct TableTemplate {
    pub name: String,
    pub pk_fields: IndexSet<String>,
    /// Widen existing non-key columns when a batch needs a more general type.
    pub column_widening: bool,
}

impl TableTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Columns to add to or widen in an existing table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDiff {
    pub added: IndexMap<String, Column>,
    pub widened: IndexMap<String, Column>,
}

impl ColumnDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.widened.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaPlan {
    /// Destination already fits the batch.
    Unchanged(Table),
    /// Destination does not exist yet.
    Create(Table),
    /// Destination needs new or wider columns; `table` is the shape after the patch.
    Patch { table: Table, diff: ColumnDiff },
}

impl SchemaPlan {
    /// Table shape once the plan is applied.
    pub fn table(&self) -> &Table {
        match self {
            SchemaPlan::Unchanged(table) | SchemaPlan::Create(table) => table,
            SchemaPlan::Patch { table, .. } => table,
        }
    }

    pub fn into_table(self) -> Table {
        match self {
            SchemaPlan::Unchanged(table) | SchemaPlan::Create(table) => table,
            SchemaPlan::Patch { table, .. } => table,
        }
    }
}

/// Reconcile the destination's `existing` shape with a batch's `fields`.
pub fn reconcile<M: TypeMapping + ?Sized>(
    existing: Option<&Table>,
    fields: &Fields,
    template: &TableTemplate,
    mapping: &M,
) -> Result<SchemaPlan> {
    match existing {
        None => create_plan(fields, template, mapping).map(SchemaPlan::Create),
        Some(table) => patch_plan(table, fields, template, mapping),
    }
}

fn create_plan<M: TypeMapping + ?Sized>(
    fields: &Fields,
    template: &TableTemplate,
    mapping: &M,
) -> Result<Table> {
    if let Some(missing) = template.pk_fields.iter().find(|pk| !fields.contains_key(*pk)) {
        return Err(BulkError::schema_conflict(
            &template.name,
            format!("primary key column '{missing}' is not present in the data"),
        ));
    }

    let mut table = Table::new(&template.name).with_primary_key(template.pk_fields.iter().cloned());
    for (name, field) in fields.iter() {
        let is_pk = template.pk_fields.contains(name);
        table.columns.insert(
            name.clone(),
            Column {
                data_type: mapping.column_type(field),
                logical_type: field.logical_type,
                nullable: !is_pk,
                new: true,
            },
        );
    }
    Ok(table)
}

fn patch_plan<M: TypeMapping + ?Sized>(
    existing: &Table,
    fields: &Fields,
    template: &TableTemplate,
    mapping: &M,
) -> Result<SchemaPlan> {
    if !template.pk_fields.is_empty() && template.pk_fields != existing.pk_fields {
        return Err(BulkError::schema_conflict(
            &existing.name,
            format!(
                "primary key {:?} does not match existing primary key {:?}",
                template.pk_fields, existing.pk_fields
            ),
        ));
    }

    let mut table = existing.clone();
    for column in table.columns.values_mut() {
        column.new = false;
    }
    let mut diff = ColumnDiff::default();

    for (name, field) in fields.iter() {
        let Some(column) = table.columns.get_mut(name) else {
            let column = Column {
                data_type: mapping.column_type(field),
                logical_type: field.logical_type,
                nullable: true,
                new: true,
            };
            diff.added.insert(name.clone(), column.clone());
            table.columns.insert(name.clone(), column);
            continue;
        };

        let widened = column.logical_type.widen(field.logical_type);
        if widened == column.logical_type || field.sql_type.is_some() {
            continue;
        }
        if existing.pk_fields.contains(name) {
            return Err(BulkError::schema_conflict(
                &existing.name,
                format!(
                    "primary key column '{name}' has type {} but the data needs {}",
                    column.data_type, field.logical_type
                ),
            ));
        }
        if template.column_widening {
            column.data_type = mapping.type_name(widened);
            column.logical_type = widened;
            diff.widened.insert(name.clone(), column.clone());
        }
    }

    if diff.is_empty() {
        Ok(SchemaPlan::Unchanged(table))
    } else {
        Ok(SchemaPlan::Patch { table, diff })
    }
}

/// Keep only the last record for each primary key. A key keeps the position
/// of its first occurrence. Records with a missing or null key value have no
/// identity and are all kept.
pub fn dedup_last_wins(rows: Vec<Record>, pk_fields: &IndexSet<String>) -> Vec<Record> {
    if pk_fields.is_empty() {
        return rows;
    }
    let mut kept: Vec<Record> = Vec::with_capacity(rows.len());
    let mut positions: HashMap<Vec<String>, usize> = HashMap::with_capacity(rows.len());
    for row in rows {
        let key: Option<Vec<String>> = pk_fields
            .iter()
            .map(|pk| match row.get(pk) {
                Some(value) if !value.is_null() => Some(value.to_json().to_string()),
                _ => None,
            })
            .collect();
        match key {
            Some(key) => match positions.get(&key) {
                Some(&at) => kept[at] = row,
                None => {
                    positions.insert(key, kept.len());
                    kept.push(row);
                }
            },
            None => kept.push(row),
        }
    }
    kept
}
