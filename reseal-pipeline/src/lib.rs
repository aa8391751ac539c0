//! reseal-pipeline: streaming explode-and-reencrypt.
//!
//! Takes a decrypted archive stream, walks its entries with
//! [`reseal_archive::ArchiveReader`], and writes each file entry through a
//! fresh cipher stream into a target from an [`EntitySinkStrategy`]. Memory use
//! is bounded by one copy buffer plus the cipher stream's chunk, whatever the
//! entry sizes.
//!
//! ```no_run
//! use reseal_crypto::{EncryptionFactory, Keyring, StreamConfig};
//! use reseal_pipeline::{explode_and_reencrypt, PipelineConfig};
//! use reseal_sink::{FsEntityStrategy, FsStrategyConfig};
//! use std::fs::File;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let keyring = Keyring::load(Path::new("pub.json"), Path::new("sec.json"), "passphrase")?;
//! let factory = EncryptionFactory::new(&keyring, "bob", "alice", StreamConfig::default())?;
//! let mut sink = FsEntityStrategy::new("out", FsStrategyConfig::default())?;
//!
//! let summary = explode_and_reencrypt(
//!     File::open("plain.zip")?,
//!     &mut sink,
//!     &factory,
//!     &PipelineConfig::default(),
//! )?;
//! println!("{} files", summary.files);
//! # Ok(())
//! # }
//! ```
//!
//! [`EntitySinkStrategy`]: reseal_sink::EntitySinkStrategy

mod config;
mod error;
mod run;

pub use config::{PipelineConfig, DEFAULT_BUFFER_SIZE};
pub use error::{EntryFailure, FailureKind, PipelineError, PipelineResult, Stage};
pub use run::{explode_and_reencrypt, RunSummary};
