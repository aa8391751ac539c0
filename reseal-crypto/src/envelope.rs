//! Envelope encryption for per-stream data keys.
//!
//! Every sealed stream gets a fresh random DEK (data encryption key). The DEK
//! is sealed to the recipient's X25519 public key with an ephemeral keypair
//! (XSalsa20-Poly1305), so the stream header reveals nothing about the sender.
//!
//! Also provides passphrase protection for secret key material stored in a
//! secret keyring (Argon2id -> ChaCha20-Poly1305).

use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// XSalsa20 nonce size used by sealed envelopes.
pub const ENVELOPE_NONCE_SIZE: usize = 24;
/// Sealed DEK size: 32-byte key + 16-byte Poly1305 tag.
pub const SEALED_DEK_SIZE: usize = KEY_SIZE + 16;
/// ChaCha20-Poly1305 nonce size.
pub const NONCE_SIZE: usize = 12;

/// X25519 keypair used to receive sealed DEKs.
///
/// The secret key implements `ZeroizeOnDrop` (from crypto_box).
pub struct EncryptionKeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl EncryptionKeyPair {
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(&mut bytes[..]);
        Self::from_secret_bytes(*bytes)
    }

    /// Returns the public key as raw 32-byte array.
    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Returns the secret key as raw 32-byte array.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Reconstructs a keypair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = SecretKey::from(bytes);
        let public = secret.public_key();
        Self { secret, public }
    }
}

/// A DEK sealed with a recipient's X25519 public key.
///
/// The ephemeral public key is carried so the recipient can reconstruct the
/// shared secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedEnvelope {
    pub ephemeral_public_key: [u8; 32],
    pub nonce: [u8; ENVELOPE_NONCE_SIZE],
    pub ciphertext: [u8; SEALED_DEK_SIZE],
}

/// Seals a DEK for a recipient using anonymous envelope encryption.
pub fn seal_dek(dek: &DerivedKey, recipient_pk: &PublicKey) -> CryptoResult<SealedEnvelope> {
    let ephemeral = EncryptionKeyPair::generate();
    let salsa_box = SalsaBox::new(recipient_pk, &ephemeral.secret);

    let mut nonce = [0u8; ENVELOPE_NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let sealed = salsa_box
        .encrypt(crypto_box::Nonce::from_slice(&nonce), dek.as_bytes().as_slice())
        .map_err(|e| CryptoError::Encryption(format!("envelope seal failed: {e}")))?;

    let ciphertext: [u8; SEALED_DEK_SIZE] =
        sealed
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: SEALED_DEK_SIZE,
                actual: sealed.len(),
            })?;

    Ok(SealedEnvelope {
        ephemeral_public_key: ephemeral.public_bytes(),
        nonce,
        ciphertext,
    })
}

/// Opens a sealed DEK using the recipient's secret key.
pub fn open_dek(envelope: &SealedEnvelope, recipient_sk: &SecretKey) -> CryptoResult<DerivedKey> {
    let ephemeral_pk = PublicKey::from(envelope.ephemeral_public_key);
    let salsa_box = SalsaBox::new(&ephemeral_pk, recipient_sk);

    let plaintext = Zeroizing::new(
        salsa_box
            .decrypt(
                crypto_box::Nonce::from_slice(&envelope.nonce),
                envelope.ciphertext.as_slice(),
            )
            .map_err(|_| {
                CryptoError::Decryption(
                    "envelope open failed (wrong key or tampered header)".to_string(),
                )
            })?,
    );

    let bytes: [u8; KEY_SIZE] =
        plaintext
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: plaintext.len(),
            })?;
    Ok(DerivedKey::from_bytes(bytes))
}

/// Secret material encrypted under a passphrase (Argon2id -> ChaCha20-Poly1305).
///
/// Bundles the salt and KDF parameters with the ciphertext so the passphrase
/// is the only input needed to open it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PassphraseProtected {
    pub kdf: KdfParams,
    #[serde(with = "crate::encoding::base64_array")]
    pub salt: [u8; SALT_SIZE],
    #[serde(with = "crate::encoding::base64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "crate::encoding::base64_vec")]
    pub ciphertext: Vec<u8>,
}

/// Encrypts `secret` with a passphrase.
pub fn protect_with_passphrase(
    secret: &[u8],
    passphrase: &str,
    kdf: &KdfParams,
) -> CryptoResult<PassphraseProtected> {
    let salt = Salt::random();
    let derived = derive_key(passphrase, &salt, kdf)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(derived.as_bytes()));

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), secret)
        .map_err(|e| CryptoError::Encryption(format!("passphrase protection failed: {e}")))?;

    Ok(PassphraseProtected {
        kdf: *kdf,
        salt: *salt.as_bytes(),
        nonce,
        ciphertext,
    })
}

/// Decrypts passphrase-protected secret material.
///
/// A wrong passphrase and a tampered ciphertext are indistinguishable; both
/// return [`CryptoError::Decryption`].
pub fn open_with_passphrase(
    protected: &PassphraseProtected,
    passphrase: &str,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let salt = Salt::from_bytes(protected.salt);
    let derived = derive_key(passphrase, &salt, &protected.kdf)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(derived.as_bytes()));

    cipher
        .decrypt(
            Nonce::from_slice(&protected.nonce),
            protected.ciphertext.as_slice(),
        )
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decryption("wrong passphrase or tampered key data".into()))
}
