//! Decrypting-and-verifying reader.

use super::header::{
    frame_nonce, header_aad, transcript, StreamHeader, FRAME_FINAL, FRAME_HEADER_LEN, FRAME_MORE,
    HEADER_LEN, NONCE_PREFIX_SIZE, SIGNATURE_SIZE, TAG_SIZE,
};
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use crate::keyring::KeyId;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use std::io::{self, Read};
use tracing::debug;

/// Who signed a stream, known once its signature has been checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verification {
    pub signer: KeyId,
    pub signer_user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Frames,
    Verified,
    Failed,
}

/// Plaintext view over a sealed stream.
///
/// Frames are authenticated as they are read; the signature over the whole
/// plaintext is checked when the final frame arrives. Until then, plaintext
/// handed out is authentic per frame but not yet attributed to the signer.
/// Call [`DecryptingReader::finish`] to consume the rest of the stream and get
/// the verified signer.
pub struct DecryptingReader<R: Read> {
    inner: R,
    cipher: ChaCha20Poly1305,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    aad: [u8; 32],
    counter: u32,
    chunk_size: usize,
    buffer: Vec<u8>,
    pos: usize,
    transcript: Sha256,
    verifying: VerifyingKey,
    verification: Verification,
    state: ReadState,
}

impl<R: Read> DecryptingReader<R> {
    pub(crate) fn new(
        inner: R,
        encoded: &[u8; HEADER_LEN],
        header: &StreamHeader,
        dek: &DerivedKey,
        verifying: VerifyingKey,
        verification: Verification,
    ) -> Self {
        let chunk_size = header.chunk_size as usize;
        Self {
            inner,
            cipher: ChaCha20Poly1305::new(Key::from_slice(dek.as_bytes())),
            nonce_prefix: header.nonce_prefix,
            aad: header_aad(encoded),
            counter: 0,
            chunk_size,
            buffer: Vec::with_capacity(chunk_size + TAG_SIZE),
            pos: 0,
            transcript: transcript(encoded),
            verifying,
            verification,
            state: ReadState::Frames,
        }
    }

    /// The signer named in the header. Only trustworthy after [`finish`](Self::finish).
    pub fn claimed_signer(&self) -> &Verification {
        &self.verification
    }

    /// Whether the final frame and signature have been read and checked.
    pub fn is_verified(&self) -> bool {
        self.state == ReadState::Verified
    }

    /// Reads (and discards) the rest of the stream, then returns the verified
    /// signer. Fails if any frame or the signature does not check out.
    pub fn finish(mut self) -> CryptoResult<Verification> {
        let mut scratch = [0u8; 8192];
        loop {
            match self.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CryptoError::from_io(e)),
            }
        }
        Ok(self.verification)
    }

    fn next_frame(&mut self) -> CryptoResult<()> {
        let mut frame_header = [0u8; FRAME_HEADER_LEN];
        read_exact_or(&mut self.inner, &mut frame_header, || {
            CryptoError::Decryption(format!(
                "stream truncated before final frame (after {} frames)",
                self.counter
            ))
        })?;

        let last = match frame_header[0] {
            FRAME_MORE => false,
            FRAME_FINAL => true,
            other => {
                return Err(CryptoError::Decryption(format!(
                    "frame {}: invalid frame flag {other:#04x}",
                    self.counter
                )));
            }
        };
        let len = u32::from_le_bytes([
            frame_header[1],
            frame_header[2],
            frame_header[3],
            frame_header[4],
        ]) as usize;

        let max = self.chunk_size + TAG_SIZE;
        let valid_len = if last {
            (TAG_SIZE..=max).contains(&len)
        } else {
            len == max
        };
        if !valid_len {
            return Err(CryptoError::Decryption(format!(
                "frame {}: invalid ciphertext length {len}",
                self.counter
            )));
        }

        self.buffer.clear();
        self.buffer.resize(len, 0);
        let counter = self.counter;
        read_exact_or(&mut self.inner, &mut self.buffer, || {
            CryptoError::Decryption(format!("frame {counter} truncated"))
        })?;

        let nonce = frame_nonce(&self.nonce_prefix, self.counter, last);
        self.cipher
            .decrypt_in_place(Nonce::from_slice(&nonce), &self.aad, &mut self.buffer)
            .map_err(|_| {
                CryptoError::Decryption(format!("frame {} failed authentication", self.counter))
            })?;
        self.transcript.update(&self.buffer);
        self.pos = 0;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| CryptoError::Decryption("too many frames".into()))?;

        if last {
            self.verify_trailer()?;
        }
        Ok(())
    }

    fn verify_trailer(&mut self) -> CryptoResult<()> {
        let mut sig_bytes = [0u8; SIGNATURE_SIZE];
        read_exact_or(&mut self.inner, &mut sig_bytes, || {
            CryptoError::Signature("signature trailer missing".into())
        })?;

        let digest = std::mem::take(&mut self.transcript).finalize();
        let signature = Signature::from_bytes(&sig_bytes);
        self.verifying
            .verify_strict(digest.as_slice(), &signature)
            .map_err(|_| {
                CryptoError::Signature(format!(
                    "invalid signature from key {}",
                    self.verification.signer
                ))
            })?;

        let mut probe = [0u8; 1];
        loop {
            match self.inner.read(&mut probe) {
                Ok(0) => break,
                Ok(_) => {
                    return Err(CryptoError::Decryption(
                        "unexpected data after signature trailer".into(),
                    ));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.state = ReadState::Verified;
        debug!(
            "verified stream signed by {} ({})",
            self.verification.signer, self.verification.signer_user_id
        );
        Ok(())
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.buffer.len() {
                let n = (self.buffer.len() - self.pos).min(out.len());
                out[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            match self.state {
                ReadState::Verified => return Ok(0),
                ReadState::Failed => {
                    return Err(
                        CryptoError::Decryption("cipher stream already failed".into()).into_io(),
                    );
                }
                ReadState::Frames => {
                    if let Err(e) = self.next_frame() {
                        self.state = ReadState::Failed;
                        self.buffer.clear();
                        self.pos = 0;
                        return Err(e.into_io());
                    }
                }
            }
        }
    }
}

/// `read_exact`, mapping a short read to a caller-chosen error.
fn read_exact_or<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    on_eof: impl FnOnce() -> CryptoError,
) -> CryptoResult<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(on_eof()),
        Err(e) => Err(CryptoError::Io(e)),
    }
}
