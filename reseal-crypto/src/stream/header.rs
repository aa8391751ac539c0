//! Fixed-size stream header and frame constants.

use crate::envelope::{SealedEnvelope, ENVELOPE_NONCE_SIZE, NONCE_SIZE, SEALED_DEK_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::keyring::{KeyId, KEY_ID_SIZE};
use sha2::{Digest, Sha256};

pub const MAGIC: [u8; 4] = *b"RSL1";
pub const FORMAT_VERSION: u8 = 1;

pub const NONCE_PREFIX_SIZE: usize = 7;
pub const TAG_SIZE: usize = 16;
pub const SIGNATURE_SIZE: usize = 64;
/// Frame header: flag byte + ciphertext length (u32 LE).
pub const FRAME_HEADER_LEN: usize = 5;

pub const FRAME_MORE: u8 = 0;
pub const FRAME_FINAL: u8 = 1;

pub const HEADER_LEN: usize = MAGIC.len()
    + 1
    + KEY_ID_SIZE
    + 32
    + ENVELOPE_NONCE_SIZE
    + SEALED_DEK_SIZE
    + KEY_ID_SIZE
    + NONCE_PREFIX_SIZE
    + 4;

const SIGNATURE_CONTEXT: &[u8] = b"reseal-stream-signature-v1";

/// Everything a reader needs before the first frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    pub recipient: KeyId,
    pub envelope: SealedEnvelope,
    pub signer: KeyId,
    pub nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    pub chunk_size: u32,
}

impl StreamHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut cursor = Cursor::new(&mut out);
        cursor.put(&MAGIC);
        cursor.put(&[FORMAT_VERSION]);
        cursor.put(self.recipient.as_bytes());
        cursor.put(&self.envelope.ephemeral_public_key);
        cursor.put(&self.envelope.nonce);
        cursor.put(&self.envelope.ciphertext);
        cursor.put(self.signer.as_bytes());
        cursor.put(&self.nonce_prefix);
        cursor.put(&self.chunk_size.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_LEN]) -> CryptoResult<Self> {
        let mut reader = FieldReader { buf: bytes, at: 0 };

        if reader.next::<4>() != MAGIC {
            return Err(CryptoError::Decryption("not a reseal stream (bad magic)".into()));
        }
        let [version] = reader.next::<1>();
        if version != FORMAT_VERSION {
            return Err(CryptoError::Decryption(format!(
                "unsupported stream version {version}"
            )));
        }

        let recipient = KeyId::from_bytes(reader.next());
        let envelope = SealedEnvelope {
            ephemeral_public_key: reader.next(),
            nonce: reader.next(),
            ciphertext: reader.next(),
        };
        let signer = KeyId::from_bytes(reader.next());
        let nonce_prefix = reader.next();
        let chunk_size = u32::from_le_bytes(reader.next());

        Ok(Self {
            recipient,
            envelope,
            signer,
            nonce_prefix,
            chunk_size,
        })
    }
}

/// AAD bound to every frame: SHA-256 of the encoded header.
pub fn header_aad(encoded: &[u8; HEADER_LEN]) -> [u8; 32] {
    Sha256::digest(encoded).into()
}

/// Signature transcript, seeded with the encoded header.
pub fn transcript(encoded: &[u8; HEADER_LEN]) -> Sha256 {
    Sha256::new()
        .chain_update(SIGNATURE_CONTEXT)
        .chain_update(encoded)
}

/// Per-frame nonce: prefix || counter (u32 BE) || final flag.
pub fn frame_nonce(prefix: &[u8; NONCE_PREFIX_SIZE], counter: u32, last: bool) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_SIZE..NONCE_SIZE - 1].copy_from_slice(&counter.to_be_bytes());
    nonce[NONCE_SIZE - 1] = u8::from(last);
    nonce
}

struct FieldReader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl FieldReader<'_> {
    fn next<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.at..self.at + N]);
        self.at += N;
        out
    }
}

struct Cursor<'a> {
    buf: &'a mut [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, at: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.at..self.at + bytes.len()].copy_from_slice(bytes);
        self.at += bytes.len();
    }
}
