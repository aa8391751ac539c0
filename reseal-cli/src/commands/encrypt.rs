//! Seal a file to a recipient and sign it.

use super::KeyringArgs;
use anyhow::{Context, Result};
use clap::Args;
use reseal_crypto::{
    CipherStreamFactory, CryptoError, EncryptionFactory, Keyring, SealingWrite, StreamConfig,
};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

#[derive(Args, Clone, Debug)]
pub struct EncryptArgs {
    /// Plaintext input file
    pub input: PathBuf,

    /// Sealed output file
    pub output: PathBuf,

    /// Recipient (user id or key id)
    #[arg(long)]
    pub recipient: String,

    /// Signing key (user id or key id)
    #[arg(long)]
    pub signer: String,

    #[command(flatten)]
    pub keyring: KeyringArgs,

    /// Plaintext bytes per cipher frame
    #[arg(long, default_value_t = StreamConfig::default().chunk_size)]
    pub chunk_size: usize,
}

/// Returns the number of plaintext bytes sealed.
pub fn run(args: &EncryptArgs) -> Result<u64> {
    let keyring = Keyring::load(
        &args.keyring.public,
        &args.keyring.secret,
        &args.keyring.passphrase,
    )
    .context("loading keyrings")?;
    let factory = EncryptionFactory::new(
        &keyring,
        &args.recipient,
        &args.signer,
        StreamConfig {
            chunk_size: args.chunk_size,
        },
    )?;

    let mut input = BufReader::new(
        File::open(&args.input).with_context(|| format!("opening {}", args.input.display()))?,
    );
    let output = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;

    let mut writer = factory.encrypt_and_sign(BufWriter::new(output))?;
    let copied = io::copy(&mut input, &mut writer).map_err(CryptoError::from_io)?;
    let mut raw = writer.finish()?;
    raw.flush()
        .with_context(|| format!("writing {}", args.output.display()))?;
    Ok(copied)
}
