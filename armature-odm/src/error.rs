//! Error types for document mapping operations.

use thiserror::Error;

/// Document mapping error type.
#[derive(Error, Debug)]
pub enum OdmError {
    /// Invalid schema or field declaration.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Two schemas disagree on a field.
    #[error("Schema conflict on field '{field}': {existing} vs {incoming}")]
    SchemaConflict {
        /// Field name.
        field: String,
        /// Kind or definition already present.
        existing: String,
        /// Kind or definition being merged in.
        incoming: String,
    },

    /// A value does not match its field descriptor.
    #[error("Validation error on '{field}': {reason}")]
    Validation {
        /// Field name.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Document not found.
    #[error("Document not found: {index}/{id}")]
    NotFound {
        /// Index name.
        index: String,
        /// Document ID.
        id: String,
    },

    /// Connection alias is not registered.
    #[error("There is no connection with alias '{0}'")]
    KeyLookup(String),

    /// The engine answered with a non-success status.
    #[error("Request failed with status {status}: {error_type}: {reason}")]
    Request {
        /// HTTP status code.
        status: u16,
        /// Engine error type.
        error_type: String,
        /// Engine error reason.
        reason: String,
    },

    /// Some items of a batch operation failed.
    #[error("{operation} failed: {succeeded} succeeded, {failed} failed")]
    Batch {
        /// Operation name (`mget`, `bulk`).
        operation: &'static str,
        /// Number of successful items.
        succeeded: usize,
        /// Number of failed items.
        failed: usize,
        /// Error details.
        errors: Vec<String>,
    },

    /// Index already exists.
    #[error("Index already exists: {0}")]
    IndexExists(String),

    /// Index not found.
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// Connection setup error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blocking runtime could not be started.
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    /// Client error from opensearch crate.
    #[error("Client error: {0}")]
    Client(#[from] opensearch::Error),
}

impl OdmError {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error means the document or index is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::IndexNotFound(_))
    }

    /// Check if this error was raised while defining a schema.
    pub fn is_schema_error(&self) -> bool {
        matches!(self, Self::Schema(_) | Self::SchemaConflict { .. })
    }
}

/// Result type alias for document mapping operations.
pub type Result<T> = std::result::Result<T, OdmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = OdmError::NotFound {
            index: "blog".to_string(),
            id: "42".to_string(),
        };
        assert_eq!(err.to_string(), "Document not found: blog/42");
        assert!(err.is_not_found());
        assert!(!err.is_schema_error());
    }

    #[test]
    fn test_conflict_is_schema_error() {
        let err = OdmError::SchemaConflict {
            field: "title".to_string(),
            existing: "text".to_string(),
            incoming: "keyword".to_string(),
        };
        assert!(err.is_schema_error());
        assert!(err.to_string().contains("title"));
    }
}
