//! Error types for the workflow, its client and the local service

use std::time::Duration;
use thiserror::Error;

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Error types that can occur while driving the vector service
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Service error (code {code}): {message}")]
    Api { code: i32, message: String },

    #[error("Client is closed")]
    ClientClosed,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid schema: {reason}")]
    InvalidSchema { reason: String },

    #[error("Invalid column {column}: {reason}")]
    InvalidColumn { column: String, reason: String },

    #[error("Column length mismatch: {column} has {actual} rows, expected {expected}")]
    ColumnLengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Dimension mismatch on {field}: expected {expected}, got {actual}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown field: {field}")]
    UnknownField { field: String },

    #[error("Missing field: {field}")]
    MissingField { field: String },

    #[error("Invalid index: {reason}")]
    InvalidIndex { reason: String },

    #[error("Invalid filter expression {expr:?}: {reason}")]
    InvalidExpr { expr: String, reason: String },

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },

    #[error("Invalid search request: {reason}")]
    InvalidSearch { reason: String },

    #[error("Collection not found: {name}")]
    CollectionNotFound { name: String },

    #[error("Collection already exists: {name}")]
    CollectionAlreadyExists { name: String },

    #[error("Collection not loaded: {name}")]
    CollectionNotLoaded { name: String },

    #[error("Partition not found: {partition} in {collection}")]
    PartitionNotFound {
        collection: String,
        partition: String,
    },

    #[error("Partition already exists: {partition} in {collection}")]
    PartitionAlreadyExists {
        collection: String,
        partition: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl WorkflowError {
    /// Whether the error was produced before anything reached the service.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            WorkflowError::InvalidSchema { .. }
                | WorkflowError::InvalidColumn { .. }
                | WorkflowError::ColumnLengthMismatch { .. }
                | WorkflowError::DimensionMismatch { .. }
                | WorkflowError::UnknownField { .. }
                | WorkflowError::MissingField { .. }
                | WorkflowError::InvalidIndex { .. }
                | WorkflowError::InvalidExpr { .. }
                | WorkflowError::InvalidVector { .. }
                | WorkflowError::InvalidSearch { .. }
                | WorkflowError::Config(_)
        )
    }
}
