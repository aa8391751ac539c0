//! Signed, chunked AEAD streams.
//!
//! Wire format:
//!
//! ```text
//! header   magic "RSL1" | version | recipient key id | sealed DEK envelope |
//!          signer key id | nonce prefix | chunk size
//! frames   flag (0 = more, 1 = final) | ciphertext len (u32 LE) | ciphertext
//! trailer  Ed25519 signature over SHA-256(header || plaintext)
//! ```
//!
//! Each frame is ChaCha20-Poly1305 under the stream's DEK with nonce
//! `prefix || counter || final-flag` and the header hash as AAD, so frames
//! cannot be reordered, dropped, or moved between streams, and truncation
//! before the final frame is detected.

mod header;
mod reader;
mod writer;

pub use header::{StreamHeader, HEADER_LEN, MAGIC};
pub use reader::{DecryptingReader, Verification};
pub use writer::CipherWriter;

use crate::envelope::{open_dek, seal_dek};
use crate::error::{CryptoError, CryptoResult};
use crate::key::generate_random_key;
use crate::keyring::{KeyId, Keyring, PublicKeyRecord};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use tracing::debug;

/// Smallest accepted chunk size.
pub const MIN_CHUNK_SIZE: usize = 1024;
/// Largest accepted chunk size.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Stream tuning shared by writers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Plaintext bytes per frame.
    pub chunk_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> CryptoResult<()> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(CryptoError::Config(format!(
                "chunk size {} outside {MIN_CHUNK_SIZE}..={MAX_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        Ok(())
    }
}

/// An encrypting writer with an explicit finalization step.
///
/// `finish` writes the cryptographic trailer and hands back the raw sink so
/// the caller can finalize it afterwards. Dropping without `finish` leaves an
/// incomplete stream behind.
pub trait SealingWrite<W>: Write {
    fn finish(self) -> CryptoResult<W>;
}

/// Produces encrypting wrappers around raw sinks.
pub trait CipherStreamFactory {
    type Output<W: Write>: SealingWrite<W>;

    fn encrypt_and_sign<W: Write>(&self, raw: W) -> CryptoResult<Self::Output<W>>;
}

/// Encrypts to one recipient and signs with one key.
pub struct EncryptionFactory {
    recipient: PublicKeyRecord,
    signer_id: KeyId,
    signing: SigningKey,
    config: StreamConfig,
}

impl EncryptionFactory {
    /// Resolves `recipient` in the public keyring and `signer` among the
    /// unlocked secret keys (by user id or key id hex).
    pub fn new(
        keyring: &Keyring,
        recipient: &str,
        signer: &str,
        config: StreamConfig,
    ) -> CryptoResult<Self> {
        config.validate()?;
        let recipient = keyring
            .find_public(recipient)
            .cloned()
            .ok_or_else(|| CryptoError::RecipientNotFound(recipient.to_string()))?;
        let signer_key = keyring.find_secret(signer).ok_or_else(|| {
            CryptoError::SignerKey(format!("no unlocked secret key for '{signer}'"))
        })?;

        debug!(
            "encryption factory: recipient {} ({}), signer {} ({})",
            recipient.key_id, recipient.user_id, signer_key.key_id, signer_key.user_id
        );
        Ok(Self {
            recipient,
            signer_id: signer_key.key_id,
            signing: signer_key.signing.clone(),
            config,
        })
    }

    pub fn recipient(&self) -> &PublicKeyRecord {
        &self.recipient
    }

    pub fn signer_id(&self) -> KeyId {
        self.signer_id
    }
}

impl CipherStreamFactory for EncryptionFactory {
    type Output<W: Write> = CipherWriter<W>;

    fn encrypt_and_sign<W: Write>(&self, raw: W) -> CryptoResult<CipherWriter<W>> {
        let dek = generate_random_key();
        let envelope = seal_dek(&dek, &self.recipient.encryption_public())?;

        let mut nonce_prefix = [0u8; header::NONCE_PREFIX_SIZE];
        rand::rng().fill_bytes(&mut nonce_prefix);

        let header = StreamHeader {
            recipient: self.recipient.key_id,
            envelope,
            signer: self.signer_id,
            nonce_prefix,
            chunk_size: self.config.chunk_size as u32,
        };
        CipherWriter::start(raw, &header, &dek, self.signing.clone())
    }
}

/// Opens sealed streams addressed to any unlocked key in a keyring.
pub struct DecryptionFactory<'k> {
    keyring: &'k Keyring,
}

impl<'k> DecryptionFactory<'k> {
    pub fn new(keyring: &'k Keyring) -> Self {
        Self { keyring }
    }

    /// Reads the header from `raw`, unseals the DEK, and resolves the signer.
    ///
    /// Fails with [`CryptoError::Decryption`] if the header is malformed or
    /// no secret key matches the recipient, and with
    /// [`CryptoError::Signature`] if the signer is not in the public keyring.
    pub fn decrypt_and_verify<R: Read>(&self, mut raw: R) -> CryptoResult<DecryptingReader<R>> {
        let mut encoded = [0u8; HEADER_LEN];
        match raw.read_exact(&mut encoded) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(CryptoError::Decryption("stream header truncated".into()));
            }
            Err(e) => return Err(e.into()),
        }
        let header = StreamHeader::decode(&encoded)?;

        let chunk_size = header.chunk_size as usize;
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(CryptoError::Decryption(format!(
                "header declares invalid chunk size {chunk_size}"
            )));
        }

        let recipient = self.keyring.secret_by_id(&header.recipient).ok_or_else(|| {
            CryptoError::Decryption(format!(
                "no secret key for recipient {} in keyring",
                header.recipient
            ))
        })?;
        let dek = open_dek(&header.envelope, &recipient.encryption)?;

        let signer = self.keyring.public_by_id(&header.signer).ok_or_else(|| {
            CryptoError::Signature(format!(
                "stream signed by unknown key {}",
                header.signer
            ))
        })?;
        let verifying = signer
            .verifying()
            .map_err(|e| CryptoError::Signature(e.to_string()))?;

        debug!(
            "opened stream for {} signed by {}",
            recipient.key_id, signer.key_id
        );
        Ok(DecryptingReader::new(
            raw,
            &encoded,
            &header,
            &dek,
            verifying,
            Verification {
                signer: signer.key_id,
                signer_user_id: signer.user_id.clone(),
            },
        ))
    }
}
