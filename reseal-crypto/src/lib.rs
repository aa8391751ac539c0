//! Cryptography layer for reseal.
//!
//! Provides:
//! - Keyrings: JSON public/secret keyrings, secret halves protected with
//!   Argon2id and ChaCha20-Poly1305
//! - Envelope encryption: a fresh DEK per stream, sealed to the recipient's
//!   X25519 key
//! - Signed streams: chunked ChaCha20-Poly1305 frames followed by an Ed25519
//!   signature over the whole plaintext
//!
//! # Architecture
//!
//! [`Keyring`] is loaded once and shared. [`EncryptionFactory`] wraps raw
//! sinks in [`CipherWriter`]s addressed to one recipient and signed by one
//! key; [`DecryptionFactory`] opens sealed streams into [`DecryptingReader`]s.
//! Callers that only need "some encrypting wrapper" depend on the
//! [`CipherStreamFactory`] and [`SealingWrite`] traits instead.

mod encoding;
pub mod envelope;
mod error;
mod key;
pub mod keyring;
pub mod stream;

pub use envelope::{
    open_dek, open_with_passphrase, protect_with_passphrase, seal_dek, EncryptionKeyPair,
    PassphraseProtected, SealedEnvelope,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
pub use keyring::{
    generate_key, KeyId, Keyring, PublicKeyRecord, PublicKeyring, SecretKeyRecord,
    SecretKeyring, UnlockedKey, KEY_ID_SIZE,
};
pub use stream::{
    CipherStreamFactory, CipherWriter, DecryptingReader, DecryptionFactory, EncryptionFactory,
    SealingWrite, StreamConfig, StreamHeader, Verification, HEADER_LEN, MAX_CHUNK_SIZE,
    MIN_CHUNK_SIZE,
};
