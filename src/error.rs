//! Error types for the record store
//!
//! Query-time failures propagate to the caller as [`StoreError`]. Malformed
//! source lines are reported as [`MalformedLine`], which the loader logs and
//! drops without ever surfacing it to a query.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::record::RecordType;

/// Errors returned by lookups and queries against the store
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The query named a field the record type does not define
    #[error("unknown field '{field}' for {record_type} records")]
    UnknownField {
        record_type: RecordType,
        field: String,
    },

    /// The type name given to a string-keyed entry point is not known
    #[error("unknown record type '{0}'")]
    UnknownRecordType(String),

    /// The source file could not be read at the last load attempt.
    /// Sticky until the next successful reload of that type.
    #[error("unable to read {record_type} source {}: {source}", .path.display())]
    SourceUnavailable {
        record_type: RecordType,
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl StoreError {
    pub fn unknown_field(record_type: RecordType, field: impl Into<String>) -> Self {
        StoreError::UnknownField {
            record_type,
            field: field.into(),
        }
    }

    pub fn source_unavailable(
        record_type: RecordType,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        StoreError::SourceUnavailable {
            record_type,
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// True for errors caused by the caller's input rather than server state
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::UnknownField { .. } | StoreError::UnknownRecordType(_)
        )
    }
}

/// A source line whose token count does not match its record type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {record_type} line (expected {expected} fields, found {found}): {line:?}")]
pub struct MalformedLine {
    pub record_type: RecordType,
    pub expected: usize,
    pub found: usize,
    pub line: String,
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn test_unknown_field_display() {
        let err = StoreError::unknown_field(RecordType::Group, "shell");
        assert_eq!(err.to_string(), "unknown field 'shell' for group records");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_source_unavailable_keeps_cause() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = StoreError::source_unavailable(RecordType::Account, "/missing/passwd", io_err);

        let msg = err.to_string();
        assert!(msg.contains("/missing/passwd"));
        assert!(msg.contains("no such file"));
        assert!(!err.is_client_error());

        let source = err.source().unwrap();
        assert!(source.to_string().contains("no such file"));
    }

    #[test]
    fn test_source_unavailable_clone_shares_cause() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = StoreError::source_unavailable(RecordType::Group, "/etc/group", io_err);
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_malformed_line_display() {
        let err = MalformedLine {
            record_type: RecordType::Group,
            expected: 4,
            found: 3,
            line: "wheel:x:10".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 4"));
        assert!(msg.contains("found 3"));
        assert!(msg.contains("wheel:x:10"));
    }
}
