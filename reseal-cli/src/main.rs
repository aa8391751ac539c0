//! `reseal`: decrypt an encrypted ZIP archive on the fly and re-encrypt every
//! entry into its own file below a destination directory.

use clap::Parser;
use reseal_cli::commands::reencrypt::{self, ReencryptArgs};
use reseal_cli::logging;
use std::process::ExitCode;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "reseal")]
#[command(about = "Explode an encrypted ZIP archive and re-encrypt each entry")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    args: ReencryptArgs,

    /// Log per-entry progress
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let started = Instant::now();
    match reencrypt::run(&cli.args) {
        Ok(report) => {
            let summary = report.summary;
            println!(
                "Re-encrypted {} files and {} directories ({} bytes) into {}",
                summary.files,
                summary.directories,
                summary.bytes,
                cli.args.dest.display()
            );
            println!(
                "Source signed by {} ({})",
                report.source_signer.signer_user_id, report.source_signer.signer
            );
            println!(
                "Re-Encryption took {:.2} s",
                started.elapsed().as_secs_f64()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            ExitCode::FAILURE
        }
    }
}
