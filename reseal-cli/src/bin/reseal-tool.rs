//! `reseal-tool`: key generation and single-file encrypt/decrypt.

use anyhow::Result;
use clap::{Parser, Subcommand};
use reseal_cli::commands::{decrypt, encrypt, keygen};
use reseal_cli::logging;

#[derive(Parser)]
#[command(name = "reseal-tool")]
#[command(about = "Manage reseal keyrings and sealed files")]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key and add it to the keyrings, creating them if needed
    Keygen(keygen::KeygenArgs),
    /// Seal a file to a recipient and sign it
    Encrypt(encrypt::EncryptArgs),
    /// Open a sealed file and verify its signature
    Decrypt(decrypt::DecryptArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Keygen(args) => {
            let key_id = keygen::run(&args)?;
            println!("Generated key {key_id} for {}", args.user_id);
        }
        Commands::Encrypt(args) => {
            let bytes = encrypt::run(&args)?;
            println!(
                "Sealed {bytes} bytes from {} into {}",
                args.input.display(),
                args.output.display()
            );
        }
        Commands::Decrypt(args) => {
            let verification = decrypt::run(&args)?;
            println!(
                "Good signature from {} ({})",
                verification.signer_user_id, verification.signer
            );
        }
    }
    Ok(())
}
