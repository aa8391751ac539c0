//! Generate a key pair and add it to a pair of keyring files.

use super::KeyringArgs;
use anyhow::{Context, Result};
use clap::Args;
use reseal_crypto::{generate_key, KdfParams, KeyId, PublicKeyring, SecretKeyring};
use std::path::Path;
use tracing::debug;

#[derive(Args, Clone, Debug)]
pub struct KeygenArgs {
    /// User id to attach to the new key
    pub user_id: String,

    #[command(flatten)]
    pub keyring: KeyringArgs,
}

pub fn run(args: &KeygenArgs) -> Result<KeyId> {
    run_with(args, &KdfParams::default())
}

/// Like [`run`] with explicit Argon2 parameters for the secret keyring.
pub fn run_with(args: &KeygenArgs, kdf: &KdfParams) -> Result<KeyId> {
    let mut public = if exists(&args.keyring.public) {
        PublicKeyring::load(&args.keyring.public)?
    } else {
        PublicKeyring::new()
    };
    let mut secret = if exists(&args.keyring.secret) {
        SecretKeyring::load(&args.keyring.secret)?
    } else {
        SecretKeyring::new()
    };

    let (public_record, secret_record) =
        generate_key(&args.user_id, &args.keyring.passphrase, kdf)
            .context("generating key")?;
    let key_id = public_record.key_id;
    debug!("adding key {key_id} for {}", args.user_id);

    public.insert(public_record);
    secret.insert(secret_record);
    public.save(&args.keyring.public)?;
    secret.save(&args.keyring.secret)?;
    Ok(key_id)
}

fn exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}
