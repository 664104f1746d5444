//! Error types for the content graph

use thiserror::Error;

/// Result type for content graph operations
pub type Result<T> = std::result::Result<T, ContentError>;

/// Content graph errors
///
/// `Validation`, `Conflict`, `Precondition` and `NotFound` are request-level
/// errors: they are raised before any state change. `Migration` is only ever
/// recorded on a job, and `SearchSync` never fails the owning transaction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContentError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Unsupported schema change on field '{field}': {reason}")]
    SchemaChange { field: String, reason: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Search sync failed: {0}")]
    SearchSync(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Store error: {message}")]
    Store { message: String, transient: bool },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ContentError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn schema_change(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaChange {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            transient: true,
        }
    }

    /// Errors that terminate the triggering request and are reported to the caller
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Conflict(_) | Self::Precondition(_) | Self::NotFound { .. }
        )
    }

    /// Errors worth retrying a bounded number of times
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store { transient: true, .. })
    }
}

impl From<serde_json::Error> for ContentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ContentError::Precondition("x".into()).is_client_error());
        assert!(ContentError::not_found("Branch", "b1").is_client_error());
        assert!(!ContentError::Migration("boom".into()).is_client_error());
        assert!(ContentError::transient("lock timeout").is_transient());
        assert!(!ContentError::Conflict("dup".into()).is_transient());
    }

    #[test]
    fn test_schema_change_error_names_field() {
        let err = ContentError::schema_change("age", "field does not exist");
        assert!(err.to_string().contains("'age'"));
    }
}
