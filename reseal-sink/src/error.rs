//! Sink error types.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Debug, Error)]
pub enum SinkError {
    /// The entry name would resolve outside the destination root.
    #[error("unsafe entry path '{0}': absolute or escapes the destination root")]
    UnsafePath(String),

    /// The destination is already occupied and the policy forbids replacing it.
    #[error("destination already exists: {0}")]
    Collision(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sink storage error: {0}")]
    Storage(String),
}

impl SinkError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        SinkError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
