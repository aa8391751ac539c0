//! The explode-and-reencrypt run.

use crate::config::PipelineConfig;
use crate::error::{EntryFailure, PipelineError, PipelineResult, Stage};
use reseal_archive::{ArchiveEntry, ArchiveError, ArchiveReader};
use reseal_crypto::{CipherStreamFactory, CryptoError, SealingWrite};
use reseal_sink::{EntitySinkStrategy, WritableTarget};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a completed run produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// File entries re-encrypted and finalized.
    pub files: usize,
    /// Directory entries handed to the strategy.
    pub directories: usize,
    /// Plaintext bytes copied across all file entries.
    pub bytes: u64,
}

impl RunSummary {
    pub fn entries(&self) -> usize {
        self.files + self.directories
    }
}

/// Reads `source` as a ZIP stream and writes every file entry through a fresh
/// cipher stream into a target opened by `strategy`.
///
/// Entries are processed one at a time, in archive order. For each file the
/// cipher stream is finished before its target is finalized. The first
/// failure aborts the run; targets that were opened but not finalized are
/// dropped, which discards them.
pub fn explode_and_reencrypt<R, F>(
    source: R,
    strategy: &mut dyn EntitySinkStrategy,
    factory: &F,
    config: &PipelineConfig,
) -> PipelineResult<RunSummary>
where
    R: Read,
    F: CipherStreamFactory,
{
    config.validate()?;

    let started = Instant::now();
    info!(
        "explode-and-reencrypt started (buffer {} bytes)",
        config.buffer_size
    );

    let mut run = Run {
        archive: ArchiveReader::new(source),
        strategy,
        factory,
        buffer: vec![0u8; config.buffer_size],
        summary: RunSummary::default(),
    };

    match run.drive() {
        Ok(()) => {
            let summary = run.summary;
            info!(
                "explode-and-reencrypt finished: {} files, {} directories, {} bytes in {:.2?}",
                summary.files,
                summary.directories,
                summary.bytes,
                started.elapsed()
            );
            Ok(summary)
        }
        Err(e) => {
            warn!(
                "explode-and-reencrypt aborted after {} entries: {e}",
                run.summary.entries()
            );
            Err(e)
        }
    }
}

struct Run<'s, 'f, R, F> {
    archive: ArchiveReader<R>,
    strategy: &'s mut dyn EntitySinkStrategy,
    factory: &'f F,
    buffer: Vec<u8>,
    summary: RunSummary,
}

impl<R: Read, F: CipherStreamFactory> Run<'_, '_, R, F> {
    fn drive(&mut self) -> PipelineResult<()> {
        loop {
            let after = self.archive.entries_seen().checked_sub(1);
            let entry = match self.archive.next_entry() {
                Ok(Some(entry)) => entry,
                Ok(None) => return Ok(()),
                Err(source) => return Err(PipelineError::Archive { after, source }),
            };
            debug!(
                "entry {}: {} '{}' ({})",
                entry.index,
                entry.kind,
                entry.name,
                entry
                    .size
                    .map_or_else(|| "size unknown".to_string(), |s| format!("{s} bytes"))
            );

            if entry.is_dir() {
                self.strategy
                    .create_directory(&entry.name)
                    .map_err(|e| entry_error(&entry, Stage::CreatingDirectory, e.into()))?;
                self.summary.directories += 1;
            } else {
                let copied = self.reencrypt(&entry)?;
                self.summary.files += 1;
                self.summary.bytes += copied;
            }
        }
    }

    fn reencrypt(&mut self, entry: &ArchiveEntry) -> PipelineResult<u64> {
        let fail = |stage: Stage, source: EntryFailure| entry_error(entry, stage, source);

        let target = self
            .strategy
            .open(&entry.name)
            .map_err(|e| fail(Stage::OpeningSink, e.into()))?;
        let mut sealed = self
            .factory
            .encrypt_and_sign(target)
            .map_err(|e| fail(Stage::OpeningCipher, e.into()))?;

        let mut body = self
            .archive
            .open(entry)
            .map_err(|e| fail(Stage::ReadingEntry, e.into()))?;
        let copied = copy_entry(&mut body, &mut sealed, &mut self.buffer)
            .map_err(|e| fail(Stage::Copying, e))?;
        drop(body);

        let target = sealed
            .finish()
            .map_err(|e| fail(Stage::SealingCipher, e.into()))?;
        target
            .finalize()
            .map_err(|e| fail(Stage::FinalizingSink, e.into()))?;

        debug!("entry {}: re-encrypted {copied} bytes", entry.index);
        Ok(copied)
    }
}

fn entry_error(entry: &ArchiveEntry, stage: Stage, source: EntryFailure) -> PipelineError {
    PipelineError::Entry {
        index: entry.index,
        name: entry.name.to_string(),
        stage,
        source,
    }
}

/// Moves an entry's content into the cipher stream, one buffer at a time.
fn copy_entry<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    buffer: &mut [u8],
) -> Result<u64, EntryFailure> {
    let mut total = 0u64;
    loop {
        let n = match reader.read(buffer) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            // A poisoned reader replays its error on every read; only bare
            // interruptions are retried.
            Err(e)
                if e.kind() == io::ErrorKind::Interrupted && ArchiveError::peek_io(&e).is_none() =>
            {
                continue
            }
            Err(e) => return Err(EntryFailure::Archive(ArchiveError::from_io(e))),
        };
        writer
            .write_all(&buffer[..n])
            .map_err(|e| match CryptoError::from_io(e) {
                CryptoError::Io(raw) => EntryFailure::Io(raw),
                other => EntryFailure::Crypto(other),
            })?;
        total += n as u64;
    }
}
