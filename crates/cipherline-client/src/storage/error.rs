//! Storage error types.

use thiserror::Error;

/// Errors that can occur during key storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}
