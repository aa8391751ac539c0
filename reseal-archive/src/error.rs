//! Archive reader errors.

use std::io;
use thiserror::Error;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Malformed framing: truncated header or body, unknown record,
    /// inconsistent sizes, bad deflate data, or a CRC mismatch.
    #[error("corrupt archive at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// Well-formed but outside what the streaming reader handles.
    #[error("unsupported archive feature at offset {offset}: {feature}")]
    Unsupported { offset: u64, feature: String },

    /// A read handle was requested for an entry that is no longer current.
    #[error("entry {requested} is no longer readable (current entry: {current:?})")]
    StaleEntry {
        requested: usize,
        current: Option<usize>,
    },

    /// The underlying source failed.
    #[error("archive source I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ArchiveError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        ArchiveError::Corrupt {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(offset: u64, feature: impl Into<String>) -> Self {
        ArchiveError::Unsupported {
            offset,
            feature: feature.into(),
        }
    }

    /// Wraps this error for transport through `Read`. Source I/O errors pass
    /// through untouched so callers can still inspect what the source raised.
    pub fn into_io(self) -> io::Error {
        match self {
            ArchiveError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }

    /// Recovers an `ArchiveError` from an `io::Error` produced by
    /// [`EntryReader`](crate::EntryReader), or wraps it as [`ArchiveError::Io`].
    pub fn from_io(err: io::Error) -> ArchiveError {
        if Self::peek_io(&err).is_none() {
            return ArchiveError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<ArchiveError>()) {
            Some(Ok(archive)) => *archive,
            Some(Err(inner)) => ArchiveError::Io(io::Error::new(kind, inner)),
            None => ArchiveError::Io(io::Error::from(kind)),
        }
    }

    pub fn peek_io(err: &io::Error) -> Option<&ArchiveError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<ArchiveError>())
    }
}
