//! Error type shared by every bulkload crate.
//!
//! Each variant corresponds to one failure class of the ingestion engine.
//! Adapters attach an [`ErrorContext`] to I/O failures so that a caller can
//! tell which bucket, table or statement was involved without parsing the
//! message.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::stream::{BulkMode, Status};
use crate::types::LogicalType;

/// Boxed error used as the cause of [`BulkError::StageIo`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used across the workspace.
pub type Result<T, E = BulkError> = std::result::Result<T, E>;

/// Destination identity attached to I/O failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Bucket, `schema.table` or similar destination identity.
    pub destination: String,
    /// Statement, object path or other operation detail.
    pub statement: Option<String>,
}

impl ErrorContext {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            statement: None,
        }
    }

    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "destination: {}", self.destination)?;
        if let Some(statement) = &self.statement {
            write!(f, ", statement: {statement}")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    /// Malformed or missing destination configuration or credentials.
    #[error("configuration error: {0}")]
    Config(String),

    /// No constructor registered for the requested backend type.
    #[error("unknown backend type: {0}")]
    UnknownBackend(String),

    /// The backend cannot run streams in the requested bulk mode.
    #[error("bulk mode '{mode}' is not supported by {backend}: {reason}")]
    ModeUnsupported {
        backend: String,
        mode: BulkMode,
        reason: String,
    },

    /// Input that is not a record: not a JSON object, or not JSON at all.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A value could not be cast to the declared default type of its field.
    #[error("error converting field [{field}] value '{value}' to {target}")]
    TypeConversion {
        field: String,
        value: String,
        target: LogicalType,
    },

    /// Primary-key type collision or DDL rejected by the backend.
    #[error("schema conflict on table '{table}': {message}")]
    SchemaConflict { table: String, message: String },

    /// Network or storage fault while staging, loading or running DDL/DML.
    #[error("{message} ({context}), cause: {source}")]
    StageIo {
        message: String,
        context: ErrorContext,
        #[source]
        source: BoxError,
    },

    /// Operation attempted on an adapter that has been closed.
    #[error("attempt to use closed {0} instance")]
    Closed(String),

    /// Consume or complete called on a stream that already finished.
    #[error("stream '{id}' is not active (status: {status})")]
    StreamNotActive { id: String, status: Status },
}

impl BulkError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn stage_io(
        message: impl Into<String>,
        context: ErrorContext,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::StageIo {
            message: message.into(),
            context,
            source: source.into(),
        }
    }

    pub fn schema_conflict(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaConflict {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Context attached to a stage I/O failure, if any.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::StageIo { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Run an adapter future, converting a panic inside it into
/// [`BulkError::StageIo`] carrying `context`.
///
/// Every network call made by an adapter goes through this boundary so that a
/// fault inside an SDK never unwinds past the adapter.
pub async fn intercept<T, F>(context: &ErrorContext, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let cause = panic_message(payload.as_ref());
            tracing::error!("panic while {operation} ({context}): {cause}");
            Err(BulkError::stage_io(
                format!("panic while {operation}"),
                context.clone(),
                cause,
            ))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
