//! Patch application errors
//!
//! Skipped targets and rejected hunks are reported outcomes, not errors.
//! Everything here aborts the patch run.

use dsvn_wc::WcError;
use std::io;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, PatchError>;

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Cannot strip {count} components from '{path}'")]
    BadStripCount { count: usize, path: String },

    #[error("Error writing to '{}'", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Wc(WcError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PatchError {
    pub fn write(path: impl AsRef<Path>, source: io::Error) -> Self {
        PatchError::Write { path: path.as_ref().to_path_buf(), source }
    }
}

impl From<WcError> for PatchError {
    fn from(e: WcError) -> Self {
        match e {
            WcError::Cancelled => PatchError::Cancelled,
            other => PatchError::Wc(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_wrapped() {
        assert!(matches!(PatchError::from(WcError::Cancelled), PatchError::Cancelled));
        let err = PatchError::from(WcError::Locked(PathBuf::from("/wc")));
        assert!(matches!(err, PatchError::Wc(WcError::Locked(_))));
        assert_eq!(err.to_string(), "Working copy '/wc' locked");
    }

    #[test]
    fn test_strip_count_message() {
        let err = PatchError::BadStripCount { count: 3, path: "a/b".into() };
        assert_eq!(err.to_string(), "Cannot strip 3 components from 'a/b'");
    }
}
