//! Type resolution.
//!
//! Turns a raw [`Record`] into [`Fields`], canonicalising the record's values
//! in place so both stay consistent.

use indexmap::IndexMap;

use crate::error::Result;
use crate::schema::{Field, Fields};
use crate::types::LogicalType;
use crate::values::{reformat, Record, Value};

/// Field name to backend type that must be used verbatim.
pub type SqlTypeHints = IndexMap<String, String>;

/// Field name to the logical type its values are cast to.
pub type DefaultTypes = IndexMap<String, LogicalType>;

/// Field carrying the event time in every record.
pub const TIMESTAMP_FIELD: &str = "_timestamp";

pub trait TypeResolver: Send + Sync {
    fn resolve(&self, record: &mut Record, sql_types: &SqlTypeHints) -> Result<Fields>;
}

/// Infers types from value shapes and applies declared default types.
#[derive(Debug, Clone)]
pub struct DefaultTypeResolver {
    default_types: DefaultTypes,
}

impl DefaultTypeResolver {
    pub fn new() -> Self {
        let mut default_types = DefaultTypes::new();
        default_types.insert(TIMESTAMP_FIELD.to_string(), LogicalType::Timestamp);
        Self { default_types }
    }

    /// Add or override declared default types.
    pub fn with_default_types(mut self, types: &DefaultTypes) -> Self {
        self.default_types
            .extend(types.iter().map(|(k, v)| (k.clone(), *v)));
        self
    }

    pub fn default_types(&self) -> &DefaultTypes {
        &self.default_types
    }
}

impl Default for DefaultTypeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeResolver for DefaultTypeResolver {
    fn resolve(&self, record: &mut Record, sql_types: &SqlTypeHints) -> Result<Fields> {
        let mut fields = Fields::new();
        let mut canonical = Vec::with_capacity(record.len());
        for (name, raw) in record.iter() {
            let value = reformat(raw.clone());
            let (value, logical_type) = match self.default_types.get(name) {
                Some(declared) => (value.convert(name, *declared)?, *declared),
                None => {
                    let logical_type = value.logical_type();
                    (value, logical_type)
                }
            };
            canonical.push(value);

            let mut field = Field::new(logical_type);
            if let Some(sql_type) = sql_types.get(name) {
                field = field.with_sql_type(sql_type.clone());
            }
            fields.insert(name.clone(), field);
        }
        // The record only changes once every field resolved
        for (slot, value) in record.values_mut().zip(canonical) {
            *slot = value;
        }
        Ok(fields)
    }
}

/// Resolver for schema-less destinations: one placeholder field, no inference.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyTypeResolver;

impl DummyTypeResolver {
    pub const FIELD: &'static str = "dummy";
}

impl TypeResolver for DummyTypeResolver {
    fn resolve(&self, _record: &mut Record, _sql_types: &SqlTypeHints) -> Result<Fields> {
        let mut fields = Fields::new();
        fields.insert(Self::FIELD, Field::new(LogicalType::Unknown));
        Ok(fields)
    }
}
