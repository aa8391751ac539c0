//! Decrypt an encrypted archive on the fly and re-encrypt each entry into a
//! directory tree.

use anyhow::{Context, Result};
use clap::Args;
use reseal_crypto::{
    DecryptionFactory, EncryptionFactory, Keyring, StreamConfig, Verification,
};
use reseal_pipeline::{explode_and_reencrypt, PipelineConfig, RunSummary, DEFAULT_BUFFER_SIZE};
use reseal_sink::{CollisionPolicy, FsEntityStrategy, FsStrategyConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Clone, Debug)]
pub struct ReencryptArgs {
    /// Recipient of the re-encrypted entries (user id or key id)
    pub recipient: String,

    /// Key to sign the re-encrypted entries with (user id or key id)
    pub signer: String,

    /// Public keyring file
    pub pub_keyring: PathBuf,

    /// Secret keyring file
    pub sec_keyring: PathBuf,

    /// Passphrase for the secret keyring
    pub passphrase: String,

    /// Encrypted source archive
    pub source: PathBuf,

    /// Directory receiving one encrypted file per entry
    pub dest: PathBuf,

    /// Suffix appended to every output file
    #[arg(long, default_value = ".rsl")]
    pub suffix: String,

    /// Replace existing output files instead of failing
    #[arg(long)]
    pub overwrite: bool,

    /// Copy buffer size in bytes
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Plaintext bytes per cipher frame
    #[arg(long, default_value_t = StreamConfig::default().chunk_size)]
    pub chunk_size: usize,
}

/// Outcome of a successful run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub summary: RunSummary,
    /// Signer of the source archive, verified after the last entry.
    pub source_signer: Verification,
}

pub fn run(args: &ReencryptArgs) -> Result<Report> {
    let keyring = Keyring::load(&args.pub_keyring, &args.sec_keyring, &args.passphrase)
        .context("loading keyrings")?;

    let encryption = EncryptionFactory::new(
        &keyring,
        &args.recipient,
        &args.signer,
        StreamConfig {
            chunk_size: args.chunk_size,
        },
    )?;

    let file = File::open(&args.source)
        .with_context(|| format!("opening {}", args.source.display()))?;
    let mut source = DecryptionFactory::new(&keyring)
        .decrypt_and_verify(BufReader::new(file))
        .with_context(|| format!("opening encrypted archive {}", args.source.display()))?;

    let mut sink = FsEntityStrategy::new(
        &args.dest,
        FsStrategyConfig {
            file_suffix: args.suffix.clone(),
            collision: if args.overwrite {
                CollisionPolicy::Overwrite
            } else {
                CollisionPolicy::Fail
            },
        },
    )?;

    info!(
        "re-encrypting {} (signed by {}, unverified) into {} for {}",
        args.source.display(),
        source.claimed_signer().signer_user_id,
        args.dest.display(),
        encryption.recipient().user_id
    );
    let summary = explode_and_reencrypt(
        &mut source,
        &mut sink,
        &encryption,
        &PipelineConfig {
            buffer_size: args.buffer_size,
        },
    )?;

    // The archive ends before the cipher stream does; the signature is only
    // checked once the rest has been read.
    let source_signer = source
        .finish()
        .context("verifying the source archive signature")?;

    Ok(Report {
        summary,
        source_signer,
    })
}
