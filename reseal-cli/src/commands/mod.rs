//! Command bodies. Each takes its parsed arguments and returns `anyhow::Result`.

pub mod decrypt;
pub mod encrypt;
pub mod keygen;
pub mod reencrypt;

use clap::Args;
use std::path::PathBuf;

/// Keyring files plus the passphrase that unlocks the secret keys.
#[derive(Args, Clone, Debug)]
pub struct KeyringArgs {
    /// Public keyring file
    #[arg(long = "pub", value_name = "PATH")]
    pub public: PathBuf,

    /// Secret keyring file
    #[arg(long = "sec", value_name = "PATH")]
    pub secret: PathBuf,

    /// Passphrase for the secret keyring
    #[arg(long, env = "RESEAL_PASSPHRASE", hide_env_values = true)]
    pub passphrase: String,
}
