//! DevEnv spec validation errors.

use thiserror::Error;

/// Shape violations found before any mutation starts. Both are fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpecError {
    /// A required field is missing or malformed
    #[error("Invalid DevEnv configuration: {0}")]
    ConfigShape(String),

    /// A workload kind other than deployment was requested
    #[error("Unsupported workload kind: {0}")]
    UnsupportedKind(String),
}
