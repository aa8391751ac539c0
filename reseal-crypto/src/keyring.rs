//! Public and secret keyrings.
//!
//! A key pairs an X25519 encryption key (receives sealed DEKs) with an Ed25519
//! signing key. The public keyring holds both public halves per user; the
//! secret keyring holds both secret halves encrypted under a passphrase.
//!
//! Keyrings are JSON files. [`Keyring::load`] reads both files and unlocks
//! every secret key with one passphrase, yielding the handle used by the
//! stream factories.

use crate::encoding::base64_array;
use crate::envelope::{open_with_passphrase, protect_with_passphrase, PassphraseProtected};
use crate::error::{CryptoError, CryptoResult};
use crate::key::KdfParams;
use crypto_box::{PublicKey, SecretKey};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;
use zeroize::Zeroizing;

/// Size of a [`KeyId`] in bytes.
pub const KEY_ID_SIZE: usize = 8;

const KEYRING_VERSION: u32 = 1;

/// Short fingerprint of a key: the first 8 bytes of
/// SHA-256(encryption public key || verifying key).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId([u8; KEY_ID_SIZE]);

impl KeyId {
    pub fn from_public_parts(encryption: &[u8; 32], verifying: &[u8; 32]) -> Self {
        let digest = Sha256::new()
            .chain_update(encryption)
            .chain_update(verifying)
            .finalize();
        let mut id = [0u8; KEY_ID_SIZE];
        id.copy_from_slice(&digest[..KEY_ID_SIZE]);
        Self(id)
    }

    pub fn from_bytes(bytes: [u8; KEY_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_ID_SIZE] {
        &self.0
    }

    /// Parses hex with an optional `0x` prefix, case-insensitive.
    pub fn parse_hex(text: &str) -> Option<Self> {
        let trimmed = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        let bytes = hex::decode(trimmed).ok()?;
        let id: [u8; KEY_ID_SIZE] = bytes.try_into().ok()?;
        Some(Self(id))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({self})")
    }
}

impl Serialize for KeyId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let text = String::deserialize(d)?;
        KeyId::parse_hex(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid key id: {text}")))
    }
}

// ============================================================================
// Public keyring
// ============================================================================

/// Public half of a key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub user_id: String,
    pub key_id: KeyId,
    #[serde(with = "base64_array")]
    pub encryption_key: [u8; 32],
    #[serde(with = "base64_array")]
    pub verifying_key: [u8; 32],
}

impl PublicKeyRecord {
    pub fn encryption_public(&self) -> PublicKey {
        PublicKey::from(self.encryption_key)
    }

    pub fn verifying(&self) -> CryptoResult<VerifyingKey> {
        VerifyingKey::from_bytes(&self.verifying_key)
            .map_err(|e| CryptoError::KeyLoad(format!("invalid verifying key for {}: {e}", self.key_id)))
    }

    fn matches(&self, selector: &str) -> bool {
        self.user_id == selector || KeyId::parse_hex(selector) == Some(self.key_id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublicKeyring {
    version: u32,
    keys: Vec<PublicKeyRecord>,
}

impl PublicKeyring {
    pub fn new() -> Self {
        Self {
            version: KEYRING_VERSION,
            keys: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> CryptoResult<Self> {
        let ring: Self = read_json(path)?;
        ring.check_version(path)?;
        for record in &ring.keys {
            let expected =
                KeyId::from_public_parts(&record.encryption_key, &record.verifying_key);
            if expected != record.key_id {
                return Err(CryptoError::KeyLoad(format!(
                    "{}: key id {} does not match its key material",
                    path.display(),
                    record.key_id
                )));
            }
        }
        Ok(ring)
    }

    pub fn save(&self, path: &Path) -> CryptoResult<()> {
        write_json(path, self)
    }

    /// Adds a key, replacing any record with the same key id.
    pub fn insert(&mut self, record: PublicKeyRecord) {
        self.keys.retain(|k| k.key_id != record.key_id);
        self.keys.push(record);
    }

    pub fn keys(&self) -> &[PublicKeyRecord] {
        &self.keys
    }

    pub fn find(&self, selector: &str) -> Option<&PublicKeyRecord> {
        self.keys.iter().find(|k| k.matches(selector))
    }

    pub fn get(&self, key_id: &KeyId) -> Option<&PublicKeyRecord> {
        self.keys.iter().find(|k| &k.key_id == key_id)
    }

    fn check_version(&self, path: &Path) -> CryptoResult<()> {
        if self.version != KEYRING_VERSION {
            return Err(CryptoError::KeyLoad(format!(
                "{}: unsupported keyring version {}",
                path.display(),
                self.version
            )));
        }
        Ok(())
    }
}

impl Default for PublicKeyring {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Secret keyring
// ============================================================================

/// Secret half of a key, protected by a passphrase.
///
/// The protected payload is the X25519 secret followed by the Ed25519 seed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretKeyRecord {
    pub user_id: String,
    pub key_id: KeyId,
    pub protected: PassphraseProtected,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretKeyring {
    version: u32,
    keys: Vec<SecretKeyRecord>,
}

impl SecretKeyring {
    pub fn new() -> Self {
        Self {
            version: KEYRING_VERSION,
            keys: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> CryptoResult<Self> {
        let ring: Self = read_json(path)?;
        if ring.version != KEYRING_VERSION {
            return Err(CryptoError::KeyLoad(format!(
                "{}: unsupported keyring version {}",
                path.display(),
                ring.version
            )));
        }
        Ok(ring)
    }

    pub fn save(&self, path: &Path) -> CryptoResult<()> {
        write_json(path, self)
    }

    pub fn insert(&mut self, record: SecretKeyRecord) {
        self.keys.retain(|k| k.key_id != record.key_id);
        self.keys.push(record);
    }

    pub fn keys(&self) -> &[SecretKeyRecord] {
        &self.keys
    }
}

impl Default for SecretKeyring {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates a new key for `user_id`, returning its public and
/// passphrase-protected secret records.
pub fn generate_key(
    user_id: &str,
    passphrase: &str,
    kdf: &KdfParams,
) -> CryptoResult<(PublicKeyRecord, SecretKeyRecord)> {
    let mut encryption_secret = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(&mut encryption_secret[..]);
    let mut signing_seed = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(&mut signing_seed[..]);

    let encryption_public = *SecretKey::from(*encryption_secret).public_key().as_bytes();
    let verifying = SigningKey::from_bytes(&signing_seed).verifying_key().to_bytes();
    let key_id = KeyId::from_public_parts(&encryption_public, &verifying);

    let mut secret_blob = Zeroizing::new(Vec::with_capacity(64));
    secret_blob.extend_from_slice(&encryption_secret[..]);
    secret_blob.extend_from_slice(&signing_seed[..]);
    let protected = protect_with_passphrase(&secret_blob, passphrase, kdf)?;

    debug!("generated key {key_id} for {user_id}");

    Ok((
        PublicKeyRecord {
            user_id: user_id.to_string(),
            key_id,
            encryption_key: encryption_public,
            verifying_key: verifying,
        },
        SecretKeyRecord {
            user_id: user_id.to_string(),
            key_id,
            protected,
        },
    ))
}

// ============================================================================
// Keyring handle
// ============================================================================

/// An unlocked secret key.
pub struct UnlockedKey {
    pub user_id: String,
    pub key_id: KeyId,
    pub encryption: SecretKey,
    pub signing: SigningKey,
}

impl fmt::Debug for UnlockedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedKey")
            .field("user_id", &self.user_id)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Loaded keyrings with all secret keys unlocked.
#[derive(Debug)]
pub struct Keyring {
    public: PublicKeyring,
    secrets: Vec<UnlockedKey>,
}

impl Keyring {
    /// Loads both keyring files and unlocks every secret key with `passphrase`.
    pub fn load(public_path: &Path, secret_path: &Path, passphrase: &str) -> CryptoResult<Self> {
        let public = PublicKeyring::load(public_path)?;
        let secret = SecretKeyring::load(secret_path)?;
        let keyring = Self::unlock(public, &secret, passphrase)?;
        debug!(
            "loaded keyring: {} public keys, {} secret keys",
            keyring.public.keys.len(),
            keyring.secrets.len()
        );
        Ok(keyring)
    }

    /// Unlocks in-memory keyrings.
    pub fn unlock(
        public: PublicKeyring,
        secret: &SecretKeyring,
        passphrase: &str,
    ) -> CryptoResult<Self> {
        let mut secrets = Vec::with_capacity(secret.keys.len());
        for record in &secret.keys {
            let blob = open_with_passphrase(&record.protected, passphrase).map_err(|e| match e {
                CryptoError::Decryption(_) => CryptoError::KeyLoad(format!(
                    "wrong passphrase for secret key {} ({})",
                    record.key_id, record.user_id
                )),
                other => CryptoError::KeyLoad(other.to_string()),
            })?;
            if blob.len() != 64 {
                return Err(CryptoError::KeyLoad(format!(
                    "secret key {} has {} bytes of key material, expected 64",
                    record.key_id,
                    blob.len()
                )));
            }

            let mut enc = Zeroizing::new([0u8; 32]);
            enc.copy_from_slice(&blob[..32]);
            let mut seed = Zeroizing::new([0u8; 32]);
            seed.copy_from_slice(&blob[32..]);

            let encryption = SecretKey::from(*enc);
            let signing = SigningKey::from_bytes(&seed);
            let derived_id = KeyId::from_public_parts(
                encryption.public_key().as_bytes(),
                &signing.verifying_key().to_bytes(),
            );
            if derived_id != record.key_id {
                return Err(CryptoError::KeyLoad(format!(
                    "secret key {} does not match its recorded key id",
                    record.key_id
                )));
            }

            secrets.push(UnlockedKey {
                user_id: record.user_id.clone(),
                key_id: record.key_id,
                encryption,
                signing,
            });
        }
        Ok(Self { public, secrets })
    }

    pub fn public(&self) -> &PublicKeyring {
        &self.public
    }

    /// Public key by user id or key id hex.
    pub fn find_public(&self, selector: &str) -> Option<&PublicKeyRecord> {
        self.public.find(selector)
    }

    pub fn public_by_id(&self, key_id: &KeyId) -> Option<&PublicKeyRecord> {
        self.public.get(key_id)
    }

    /// Unlocked secret key by user id or key id hex.
    pub fn find_secret(&self, selector: &str) -> Option<&UnlockedKey> {
        let by_id = KeyId::parse_hex(selector);
        self.secrets
            .iter()
            .find(|k| k.user_id == selector || Some(k.key_id) == by_id)
    }

    pub fn secret_by_id(&self, key_id: &KeyId) -> Option<&UnlockedKey> {
        self.secrets.iter().find(|k| &k.key_id == key_id)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CryptoResult<T> {
    let bytes = fs::read(path)
        .map_err(|e| CryptoError::KeyLoad(format!("{}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CryptoError::KeyLoad(format!("{}: {e}", path.display())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> CryptoResult<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| CryptoError::Config(format!("keyring serialization failed: {e}")))?;
    fs::write(path, json)?;
    Ok(())
}
