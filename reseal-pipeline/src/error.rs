//! Pipeline error types.

use reseal_archive::ArchiveError;
use reseal_crypto::CryptoError;
use reseal_sink::SinkError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for pipeline runs.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Step of an entry's processing at which a run failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    ReadingEntry,
    CreatingDirectory,
    OpeningSink,
    OpeningCipher,
    Copying,
    SealingCipher,
    FinalizingSink,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Stage::ReadingEntry => "reading entry",
            Stage::CreatingDirectory => "creating directory",
            Stage::OpeningSink => "opening sink target",
            Stage::OpeningCipher => "opening cipher stream",
            Stage::Copying => "copying",
            Stage::SealingCipher => "sealing cipher stream",
            Stage::FinalizingSink => "finalizing sink target",
        };
        f.write_str(text)
    }
}

/// Failure classes a caller can act on, independent of which layer raised them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Malformed or unsupported archive framing, CRC or size mismatch.
    CorruptArchive,
    StaleEntry,
    UnsafePath,
    /// The destination rejected or failed a write, collision included.
    Sink,
    KeyLoad,
    Decryption,
    Signature,
    RecipientNotFound,
    SignerKey,
    Encryption,
    Config,
    Io,
}

/// The layer-specific cause of an entry failure.
#[derive(Debug, Error)]
pub enum EntryFailure {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A raw write to the sink target failed underneath the cipher stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EntryFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            EntryFailure::Archive(e) => archive_kind(e),
            EntryFailure::Sink(e) => sink_kind(e),
            EntryFailure::Crypto(e) => crypto_kind(e),
            EntryFailure::Io(_) => FailureKind::Io,
        }
    }
}

/// Why a run aborted.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Processing a specific entry failed.
    #[error("entry {index} ({name}) failed while {stage}: {source}")]
    Entry {
        index: usize,
        name: String,
        stage: Stage,
        #[source]
        source: EntryFailure,
    },

    /// The archive could not be advanced to the next entry.
    #[error("archive unreadable {}: {source}", describe_after(.after))]
    Archive {
        /// Index of the last entry read before the failure.
        after: Option<usize>,
        #[source]
        source: ArchiveError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Entry { source, .. } => source.kind(),
            PipelineError::Archive { source, .. } => archive_kind(source),
            PipelineError::Config(_) => FailureKind::Config,
        }
    }

    /// The stage that failed, if the failure belongs to an entry.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Entry { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Index of the entry being processed, if any.
    pub fn entry_index(&self) -> Option<usize> {
        match self {
            PipelineError::Entry { index, .. } => Some(*index),
            _ => None,
        }
    }
}

fn describe_after(after: &Option<usize>) -> String {
    match after {
        Some(index) => format!("after entry {index}"),
        None => "before the first entry".to_string(),
    }
}

fn archive_kind(err: &ArchiveError) -> FailureKind {
    match err {
        ArchiveError::Corrupt { .. } | ArchiveError::Unsupported { .. } => {
            FailureKind::CorruptArchive
        }
        ArchiveError::StaleEntry { .. } => FailureKind::StaleEntry,
        // The archive source is usually a decrypting reader; its failures
        // arrive here wrapped in io::Error.
        ArchiveError::Io(e) => match CryptoError::peek_io(e) {
            Some(crypto) => crypto_kind(crypto),
            None => FailureKind::Io,
        },
    }
}

fn sink_kind(err: &SinkError) -> FailureKind {
    match err {
        SinkError::UnsafePath(_) => FailureKind::UnsafePath,
        SinkError::Collision(_) | SinkError::Io { .. } | SinkError::Storage(_) => FailureKind::Sink,
    }
}

fn crypto_kind(err: &CryptoError) -> FailureKind {
    match err {
        CryptoError::KeyLoad(_) => FailureKind::KeyLoad,
        CryptoError::Decryption(_) => FailureKind::Decryption,
        CryptoError::Signature(_) => FailureKind::Signature,
        CryptoError::RecipientNotFound(_) => FailureKind::RecipientNotFound,
        CryptoError::SignerKey(_) => FailureKind::SignerKey,
        CryptoError::Encryption(_)
        | CryptoError::KeyDerivation(_)
        | CryptoError::InvalidKeyLength { .. } => FailureKind::Encryption,
        CryptoError::Config(_) => FailureKind::Config,
        CryptoError::Io(_) => FailureKind::Io,
    }
}
