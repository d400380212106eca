//! Error type shared by every working-copy operation

use std::io;
use std::path::{Path, PathBuf};

/// Result type for working-copy operations
pub type Result<T> = std::result::Result<T, WcError>;

/// Errors that can occur while reading or mutating a working copy
#[derive(Debug, thiserror::Error)]
pub enum WcError {
    #[error("The node '{}' was not found", .0.display())]
    NotFound(PathBuf),

    #[error("'{}' is not a working copy", .0.display())]
    NotWorkingCopy(PathBuf),

    #[error("Working copy is corrupt: {0}")]
    Corrupt(String),

    #[error("{0}")]
    UnexpectedStatus(String),

    #[error("Working copy '{}' locked", .0.display())]
    Locked(PathBuf),

    #[error("Pristine text '{0}' not present")]
    Missing(String),

    #[error("'{}' already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error on '{}': {source}", .path.display())]
    PathIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification used by callers that decide between skipping and aborting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    NotWorkingCopy,
    Corrupt,
    UnexpectedStatus,
    Locked,
    Cancelled,
    NotImplemented,
    Io,
    Other,
}

impl WcError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        WcError::PathIo { path: path.as_ref().to_path_buf(), source }
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        WcError::UnexpectedStatus(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WcError::NotFound(_) => ErrorKind::NotFound,
            WcError::NotWorkingCopy(_) => ErrorKind::NotWorkingCopy,
            WcError::Corrupt(_) | WcError::Missing(_) | WcError::Serialization(_) => ErrorKind::Corrupt,
            WcError::UnexpectedStatus(_) => ErrorKind::UnexpectedStatus,
            WcError::Locked(_) => ErrorKind::Locked,
            WcError::Cancelled => ErrorKind::Cancelled,
            WcError::NotImplemented(_) => ErrorKind::NotImplemented,
            WcError::PathIo { .. } | WcError::Io(_) => ErrorKind::Io,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WcError::NotFound(_))
    }

    /// True for an I/O error caused by a missing file
    pub fn is_io_not_found(&self) -> bool {
        match self {
            WcError::PathIo { source, .. } | WcError::Io(source) => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<bincode::Error> for WcError {
    fn from(e: bincode::Error) -> Self {
        WcError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for WcError {
    fn from(e: serde_json::Error) -> Self {
        WcError::Serialization(e.to_string())
    }
}
