//! Open a sealed file and verify its signature.

use super::KeyringArgs;
use anyhow::{Context, Result};
use clap::Args;
use reseal_crypto::{CryptoError, DecryptionFactory, Keyring, Verification};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use tracing::warn;

#[derive(Args, Clone, Debug)]
pub struct DecryptArgs {
    /// Sealed input file
    pub input: PathBuf,

    /// Plaintext output file
    pub output: PathBuf,

    #[command(flatten)]
    pub keyring: KeyringArgs,
}

/// Writes the plaintext and returns the verified signer. The output file is
/// removed again if the stream fails to decrypt or verify.
pub fn run(args: &DecryptArgs) -> Result<Verification> {
    let keyring = Keyring::load(
        &args.keyring.public,
        &args.keyring.secret,
        &args.keyring.passphrase,
    )
    .context("loading keyrings")?;

    let input = BufReader::new(
        File::open(&args.input).with_context(|| format!("opening {}", args.input.display()))?,
    );
    let mut reader = DecryptionFactory::new(&keyring).decrypt_and_verify(input)?;

    let output = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mut writer = BufWriter::new(output);

    let result = io::copy(&mut reader, &mut writer)
        .map_err(CryptoError::from_io)
        .and_then(|_| reader.finish())
        .and_then(|verification| {
            writer.flush()?;
            Ok(verification)
        });

    match result {
        Ok(verification) => Ok(verification),
        Err(e) => {
            drop(writer);
            if let Err(remove) = fs::remove_file(&args.output) {
                warn!("failed to remove {}: {remove}", args.output.display());
            }
            Err(e.into())
        }
    }
}
