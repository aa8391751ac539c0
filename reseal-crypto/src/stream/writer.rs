//! Encrypting-and-signing writer.

use super::header::{
    frame_nonce, header_aad, transcript, StreamHeader, FRAME_FINAL, FRAME_MORE, HEADER_LEN,
    NONCE_PREFIX_SIZE, TAG_SIZE,
};
use super::SealingWrite;
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use tracing::debug;

/// Wraps a raw sink and encrypts everything written to it.
///
/// Plaintext is buffered up to one chunk and sealed into frames. Nothing
/// written is durable until [`SealingWrite::finish`] emits the final frame and
/// the signature trailer; a writer dropped before that produces a stream that
/// fails to decrypt.
pub struct CipherWriter<W: Write> {
    inner: W,
    cipher: ChaCha20Poly1305,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    aad: [u8; 32],
    counter: u32,
    chunk_size: usize,
    buffer: Vec<u8>,
    transcript: Sha256,
    signing: SigningKey,
    plaintext_len: u64,
    failed: bool,
}

impl<W: Write> CipherWriter<W> {
    /// Writes the header to `inner` and prepares frame encryption.
    pub(crate) fn start(
        mut inner: W,
        header: &StreamHeader,
        dek: &DerivedKey,
        signing: SigningKey,
    ) -> CryptoResult<Self> {
        let encoded: [u8; HEADER_LEN] = header.encode();
        inner.write_all(&encoded)?;

        let chunk_size = header.chunk_size as usize;
        Ok(Self {
            inner,
            cipher: ChaCha20Poly1305::new(Key::from_slice(dek.as_bytes())),
            nonce_prefix: header.nonce_prefix,
            aad: header_aad(&encoded),
            counter: 0,
            chunk_size,
            buffer: Vec::with_capacity(chunk_size + TAG_SIZE),
            transcript: transcript(&encoded),
            signing,
            plaintext_len: 0,
            failed: false,
        })
    }

    /// Plaintext bytes accepted so far.
    pub fn plaintext_len(&self) -> u64 {
        self.plaintext_len
    }

    fn seal_frame(&mut self, last: bool) -> CryptoResult<()> {
        let nonce = frame_nonce(&self.nonce_prefix, self.counter, last);
        self.cipher
            .encrypt_in_place(Nonce::from_slice(&nonce), &self.aad, &mut self.buffer)
            .map_err(|e| CryptoError::Encryption(format!("frame {}: {e}", self.counter)))?;

        let flag = if last { FRAME_FINAL } else { FRAME_MORE };
        let len = self.buffer.len() as u32;
        self.inner.write_all(&[flag])?;
        self.inner.write_all(&len.to_le_bytes())?;
        self.inner.write_all(&self.buffer)?;
        self.buffer.clear();

        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| CryptoError::Encryption("stream exceeds maximum frame count".into()))?;
        Ok(())
    }

    fn guard(&self) -> io::Result<()> {
        if self.failed {
            return Err(CryptoError::Encryption("cipher stream already failed".into()).into_io());
        }
        Ok(())
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard()?;
        if buf.is_empty() {
            return Ok(0);
        }
        // A full buffer is only sealed once more input arrives, so the last
        // chunk is always emitted by `finish` with the final flag.
        if self.buffer.len() == self.chunk_size {
            if let Err(e) = self.seal_frame(false) {
                self.failed = true;
                return Err(e.into_io());
            }
        }
        let take = (self.chunk_size - self.buffer.len()).min(buf.len());
        self.buffer.extend_from_slice(&buf[..take]);
        self.transcript.update(&buf[..take]);
        self.plaintext_len += take as u64;
        Ok(take)
    }

    /// Flushes the raw sink. Buffered plaintext stays buffered: only whole
    /// chunks or the final frame may be sealed.
    fn flush(&mut self) -> io::Result<()> {
        self.guard()?;
        self.inner.flush()
    }
}

impl<W: Write> SealingWrite<W> for CipherWriter<W> {
    fn finish(mut self) -> CryptoResult<W> {
        if self.failed {
            return Err(CryptoError::Encryption(
                "cannot finish a failed cipher stream".into(),
            ));
        }
        self.seal_frame(true)?;

        let digest = self.transcript.finalize();
        let signature = self.signing.sign(digest.as_slice());
        self.inner.write_all(&signature.to_bytes())?;
        self.inner.flush()?;

        debug!(
            "sealed stream: {} plaintext bytes in {} frames",
            self.plaintext_len, self.counter
        );
        Ok(self.inner)
    }
}
