//! Error types for the GPIB console core.
//!
//! Every failure carries the offending instrument id or field names so the
//! REST layer can surface them without inventing generic messages.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::models::InstrumentId;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Main error type for the GPIB console core.
#[derive(Debug, Error)]
pub enum GpibError {
    #[error("Validation failed: {}", format_fields(.fields))]
    Validation { fields: Vec<FieldError> },

    #[error("Instrument not found: {id}")]
    NotFound { id: InstrumentId },

    #[error("Instrument {id} is not connected")]
    NotConnected { id: InstrumentId },

    #[error("Transport timeout for instrument {id} after {timeout:?}")]
    TransportTimeout { id: InstrumentId, timeout: Duration },

    #[error("Transport error for instrument {id}: {message}")]
    Transport { id: InstrumentId, message: String },

    // Storage errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

fn format_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for GPIB console operations.
pub type Result<T> = std::result::Result<T, GpibError>;

impl From<std::io::Error> for GpibError {
    fn from(err: std::io::Error) -> Self {
        GpibError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for GpibError {
    fn from(err: serde_json::Error) -> Self {
        GpibError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for GpibError {
    fn from(err: rusqlite::Error) -> Self {
        GpibError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl GpibError {
    /// Validation failure for a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        GpibError::Validation {
            fields: vec![FieldError::new(field, message)],
        }
    }

    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        GpibError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Stable machine-readable error kind.
    ///
    /// These strings are part of the REST contract:
    /// - `validation_error`: user-correctable input problem
    /// - `not_found`: unknown instrument id
    /// - `not_connected`: measure without an active session
    /// - `transport_timeout` / `transport_error`: hardware layer failures
    /// - `storage_error`: persistence layer unavailable
    /// - `internal_error`: everything else
    pub fn kind(&self) -> &'static str {
        match self {
            GpibError::Validation { .. } => "validation_error",
            GpibError::NotFound { .. } => "not_found",
            GpibError::NotConnected { .. } => "not_connected",
            GpibError::TransportTimeout { .. } => "transport_timeout",
            GpibError::Transport { .. } => "transport_error",
            GpibError::Database { .. } | GpibError::Io { .. } => "storage_error",
            GpibError::Json { .. } | GpibError::Config { .. } | GpibError::Other(_) => {
                "internal_error"
            }
        }
    }

    /// The instrument id this error refers to, if any.
    pub fn instrument_id(&self) -> Option<InstrumentId> {
        match self {
            GpibError::NotFound { id }
            | GpibError::NotConnected { id }
            | GpibError::TransportTimeout { id, .. }
            | GpibError::Transport { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Field-level details for validation failures.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            GpibError::Validation { fields } => fields,
            _ => &[],
        }
    }

    /// Check if the caller may retry this operation.
    ///
    /// The core never retries by itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GpibError::Database { .. }
                | GpibError::Io { .. }
                | GpibError::TransportTimeout { .. }
                | GpibError::Transport { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GpibError::NotFound { id: 42 };
        assert_eq!(err.to_string(), "Instrument not found: 42");

        let err = GpibError::Validation {
            fields: vec![
                FieldError::new("name", "must not be empty"),
                FieldError::new("gpibAddress", "must be between 0 and 30"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Validation failed: name: must not be empty; gpibAddress: must be between 0 and 30"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(GpibError::NotConnected { id: 1 }.kind(), "not_connected");
        assert_eq!(
            GpibError::invalid_field("range", "bad").kind(),
            "validation_error"
        );
        assert_eq!(
            GpibError::Database {
                message: "locked".into(),
                source: None
            }
            .kind(),
            "storage_error"
        );
    }

    #[test]
    fn test_instrument_id_context() {
        assert_eq!(GpibError::NotConnected { id: 7 }.instrument_id(), Some(7));
        assert_eq!(GpibError::Other("x".into()).instrument_id(), None);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(GpibError::TransportTimeout {
            id: 1,
            timeout: Duration::from_secs(5)
        }
        .is_retryable());
        assert!(!GpibError::NotFound { id: 1 }.is_retryable());
        assert!(!GpibError::invalid_field("name", "empty").is_retryable());
    }
}
