//! Error types for the changelog engine.

use crate::codec::CodecError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for changelog operations.
pub type ChangelogResult<T> = Result<T, ChangelogError>;

/// Errors that can occur in changelog operations.
#[derive(Debug, Error)]
pub enum ChangelogError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] replog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored payload could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A log file is damaged beyond the tail repair done on open.
    #[error("changelog corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// The file a cursor was reading has been purged.
    #[error("cursor aborted: {} was purged", .path.display())]
    CursorAborted {
        /// Path of the purged file.
        path: PathBuf,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration issue.
        message: String,
    },

    /// The operation is not allowed in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the problem.
        message: String,
    },

    /// The log has been closed.
    #[error("log closed: {}", .path.display())]
    LogClosed {
        /// Directory of the closed log.
        path: PathBuf,
    },

    /// Another environment holds the changelog root.
    #[error("changelog environment locked: {}", .path.display())]
    EnvironmentLocked {
        /// Root directory that is locked.
        path: PathBuf,
    },

    /// Purged files that could not be removed from disk.
    #[error("could not delete {} purged log file(s): {paths:?}", .paths.len())]
    UndeletableFiles {
        /// Files left behind.
        paths: Vec<PathBuf>,
    },
}

impl ChangelogError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an aborted-cursor error for `path`.
    pub fn cursor_aborted(path: impl Into<PathBuf>) -> Self {
        Self::CursorAborted { path: path.into() }
    }

    /// Creates an invalid config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a log-closed error for the log at `path`.
    pub fn log_closed(path: &Path) -> Self {
        Self::LogClosed {
            path: path.to_path_buf(),
        }
    }

    /// Returns true if this error reports a purged cursor.
    #[must_use]
    pub fn is_cursor_aborted(&self) -> bool {
        matches!(self, Self::CursorAborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_purged_file() {
        let err = ChangelogError::cursor_aborted("/logs/1_2.log");
        assert_eq!(err.to_string(), "cursor aborted: /logs/1_2.log was purged");
        assert!(err.is_cursor_aborted());
    }

    #[test]
    fn codec_errors_convert() {
        let err: ChangelogError = CodecError::Invalid("bad tag".into()).into();
        assert!(matches!(err, ChangelogError::Codec(_)));
        assert!(!err.is_cursor_aborted());
    }
}
