//! Streaming archive reader for reseal.
//!
//! Reads a ZIP archive front to back from any `Read`, one entry at a time,
//! without seeking and without holding more than a fixed buffer in memory.
//!
//! ```no_run
//! use reseal_archive::ArchiveReader;
//! use std::io::Read;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = std::fs::File::open("bundle.zip")?;
//! let mut archive = ArchiveReader::new(file);
//! while let Some(entry) = archive.next_entry()? {
//!     let mut content = Vec::new();
//!     archive.open(&entry)?.read_to_end(&mut content)?;
//!     println!("{} ({} bytes)", entry.name, content.len());
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod reader;

pub use error::{ArchiveError, ArchiveResult};
pub use reader::{ArchiveEntry, ArchiveReader, EntryReader, DEFAULT_READ_BUFFER};
