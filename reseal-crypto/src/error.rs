//! Crypto error types.

use std::io;
use thiserror::Error;

/// Result type for key and stream operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by keyrings and cipher streams.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Keyring file unreadable, malformed, or locked with a different passphrase.
    #[error("failed to load keyring: {0}")]
    KeyLoad(String),

    /// Ciphertext could not be opened: bad header, no matching secret key,
    /// failed authentication, or a truncated stream.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The stream's signature is missing, from an unknown key, or invalid.
    #[error("signature verification failed: {0}")]
    Signature(String),

    #[error("recipient not found in public keyring: {0}")]
    RecipientNotFound(String),

    #[error("signing key unavailable: {0}")]
    SignerKey(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CryptoError {
    /// Wraps this error into an `io::Error` so it can travel through `Read`/`Write`.
    pub fn into_io(self) -> io::Error {
        match self {
            CryptoError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }

    /// Recovers a `CryptoError` previously wrapped with [`CryptoError::into_io`].
    pub fn from_io(err: io::Error) -> CryptoError {
        if Self::peek_io(&err).is_none() {
            return CryptoError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<CryptoError>()) {
            Some(Ok(crypto)) => *crypto,
            Some(Err(inner)) => CryptoError::Io(io::Error::new(kind, inner)),
            None => CryptoError::Io(io::Error::from(kind)),
        }
    }

    /// Borrows the `CryptoError` inside an `io::Error`, if there is one.
    pub fn peek_io(err: &io::Error) -> Option<&CryptoError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<CryptoError>())
    }
}
