//! Forward-only ZIP reader over a non-seekable stream.
//!
//! # Invariants
//! - Records are read strictly in physical order; nothing is buffered beyond
//!   the fixed `BufReader` capacity and the deflate window.
//! - At most one entry is current. Its body must be consumed (or is drained)
//!   before the next header is parsed.
//! - Every file entry's CRC-32 and sizes are checked when its last byte is
//!   read. A mismatch surfaces in place of end-of-entry.
//! - After any framing or source error the reader is poisoned and every later
//!   call fails.
//!
//! # Supported
//! - Local file headers with method 0 (stored) or 8 (deflate).
//! - Deflate entries with a trailing data descriptor (flag bit 3), with or
//!   without the optional `PK\x07\x08` signature.
//!
//! # Not Supported
//! - Encrypted entries, Zip64, other compression methods, and stored entries
//!   whose size is only known from a data descriptor.
//!
//! The central directory is never consulted. Reaching it ends the entry
//! sequence, and the rest of the source is drained so a wrapping verifier
//! observes the end of its input.

use crate::error::{ArchiveError, ArchiveResult};
use flate2::bufread::DeflateDecoder;
use reseal_types::{EntryKind, EntryName};
use std::io::{self, BufRead, BufReader, Read, Take};
use tracing::debug;

const SIG_LFH: u32 = 0x0403_4b50;
const SIG_CDFH: u32 = 0x0201_4b50;
const SIG_EOCD: u32 = 0x0605_4b50;
const SIG_ZIP64_EOCD: u32 = 0x0606_4b50;
const SIG_ZIP64_LOCATOR: u32 = 0x0706_4b50;
const SIG_DIGITAL_SIGNATURE: u32 = 0x0505_4b50;
const SIG_DATA_DESCRIPTOR: u32 = 0x0807_4b50;

/// Local file header length after the signature.
const LFH_FIXED_LEN: usize = 26;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

const ZIP64_SENTINEL: u32 = 0xFFFF_FFFF;

/// Default read-ahead buffer over the source.
pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;

/// Metadata of one archive entry.
///
/// Owned and cheap to clone; pass it back to [`ArchiveReader::open`] to read
/// the content while the entry is still current.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// 0-based position in the archive.
    pub index: usize,
    pub name: EntryName,
    /// Name exactly as stored in the archive (lossily decoded as UTF-8).
    pub raw_name: String,
    pub kind: EntryKind,
    /// Uncompressed size, unknown for deflate entries with a data descriptor.
    pub size: Option<u64>,
}

impl ArchiveEntry {
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Streaming reader over a ZIP byte stream.
pub struct ArchiveReader<R> {
    body: Body<R>,
    current: Option<Current>,
    next_index: usize,
    /// Source offset of the last record header, for errors raised while the
    /// source is not reachable.
    record_offset: u64,
    finished: bool,
    poison: Option<Poison>,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(source: R) -> Self {
        Self::with_capacity(DEFAULT_READ_BUFFER, source)
    }

    pub fn with_capacity(capacity: usize, source: R) -> Self {
        Self {
            body: Body::Idle(Tracked {
                inner: BufReader::with_capacity(capacity, source),
                consumed: 0,
                failed: false,
            }),
            current: None,
            next_index: 0,
            record_offset: 0,
            finished: false,
            poison: None,
        }
    }

    /// Advances to the next entry, draining whatever is left of the current
    /// one. Returns `None` once the central directory or a clean end of input
    /// is reached.
    pub fn next_entry(&mut self) -> ArchiveResult<Option<ArchiveEntry>> {
        self.check_poison()?;
        if self.finished {
            return Ok(None);
        }
        let result = self.advance();
        result.map_err(|e| self.fail(e))
    }

    /// Returns a read handle for `entry`, which must be the current entry.
    pub fn open(&mut self, entry: &ArchiveEntry) -> ArchiveResult<EntryReader<'_, R>> {
        self.check_poison()?;
        let current = self.current.as_ref().map(|c| c.index);
        if current != Some(entry.index) {
            return Err(ArchiveError::StaleEntry {
                requested: entry.index,
                current,
            });
        }
        Ok(EntryReader { archive: self })
    }

    /// Entries returned so far.
    pub fn entries_seen(&self) -> usize {
        self.next_index
    }

    /// Bytes consumed from the source so far.
    pub fn position(&self) -> u64 {
        self.body
            .source()
            .map(|s| s.consumed)
            .unwrap_or(self.record_offset)
    }

    fn advance(&mut self) -> ArchiveResult<Option<ArchiveEntry>> {
        if self.current.as_ref().is_some_and(|c| !c.done) {
            self.drain_current()?;
        }
        self.current = None;

        let offset = self.position();
        self.record_offset = offset;
        let mut source = match std::mem::replace(&mut self.body, Body::Poisoned) {
            Body::Idle(source) => source,
            _ => {
                return Err(ArchiveError::corrupt(
                    offset,
                    "reader is not at a record boundary",
                ));
            }
        };

        let header = match read_record(&mut source, offset)? {
            Record::Local(header) => header,
            Record::End { trailing } => {
                debug!(
                    "archive: {} entries, central directory at offset {offset}, {trailing} trailing bytes drained",
                    self.next_index
                );
                self.body = Body::Idle(source);
                self.finished = true;
                return Ok(None);
            }
            Record::Eof => {
                debug!(
                    "archive: {} entries, input ended at offset {offset} without a central directory",
                    self.next_index
                );
                self.body = Body::Idle(source);
                self.finished = true;
                return Ok(None);
            }
        };

        let data_start = source.consumed;
        self.body = match (header.method, header.descriptor) {
            (METHOD_DEFLATED, true) => Body::Streamed(DeflateDecoder::new(source)),
            (METHOD_DEFLATED, false) => {
                Body::Deflated(DeflateDecoder::new(source.take(u64::from(header.compressed))))
            }
            _ => Body::Stored(source.take(u64::from(header.compressed))),
        };

        let index = self.next_index;
        self.next_index += 1;
        let kind = if header.raw_name.ends_with('/') || header.raw_name.ends_with('\\') {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let size = (!header.descriptor).then_some(u64::from(header.uncompressed));

        debug!(
            "entry {index} at offset {offset}: '{}' ({kind}, method {}, size {})",
            header.raw_name,
            header.method,
            size.map_or_else(|| "unknown".to_string(), |s| s.to_string())
        );

        self.current = Some(Current {
            index,
            kind,
            expected_crc: header.crc,
            declared_size: size,
            data_start,
            produced: 0,
            hasher: crc32fast::Hasher::new(),
            done: false,
        });

        Ok(Some(ArchiveEntry {
            index,
            name: EntryName::parse(&header.raw_name),
            raw_name: header.raw_name,
            kind,
            size,
        }))
    }

    fn read_entry(&mut self, buf: &mut [u8]) -> ArchiveResult<usize> {
        self.check_poison()?;
        let is_dir = self.current.as_ref().is_some_and(|c| c.kind.is_dir());
        let result = if is_dir {
            self.drain_current().map(|()| 0)
        } else {
            self.read_body(buf)
        };
        result.map_err(|e| self.fail(e))
    }

    fn drain_current(&mut self) -> ArchiveResult<()> {
        let mut scratch = [0u8; 8 * 1024];
        while self.read_body(&mut scratch)? > 0 {}
        Ok(())
    }

    fn read_body(&mut self, buf: &mut [u8]) -> ArchiveResult<usize> {
        let offset = self.position();
        let Some(current) = self.current.as_mut() else {
            return Ok(0);
        };
        if current.done || buf.is_empty() {
            return Ok(0);
        }

        let read = match &mut self.body {
            Body::Stored(r) => r.read(buf),
            Body::Deflated(r) => r.read(buf),
            Body::Streamed(r) => r.read(buf),
            Body::Idle(_) | Body::Poisoned => {
                return Err(ArchiveError::corrupt(offset, "entry body is not readable"));
            }
        };
        let n = match read {
            Ok(n) => n,
            Err(e) if self.body.source().is_some_and(|s| s.failed) => {
                return Err(ArchiveError::Io(e));
            }
            Err(e) => {
                return Err(ArchiveError::corrupt(
                    offset,
                    format!("entry {}: invalid deflate data: {e}", current.index),
                ));
            }
        };

        if n > 0 {
            current.hasher.update(&buf[..n]);
            current.produced += n as u64;
            if let Some(size) = current.declared_size {
                if current.produced > size {
                    return Err(ArchiveError::corrupt(
                        offset,
                        format!(
                            "entry {} inflates past its declared size of {size} bytes",
                            current.index
                        ),
                    ));
                }
            }
            return Ok(n);
        }

        self.complete_entry()?;
        Ok(0)
    }

    /// Validates the end of the current entry and returns to a record boundary.
    fn complete_entry(&mut self) -> ArchiveResult<()> {
        let offset = self.position();
        let body = std::mem::replace(&mut self.body, Body::Poisoned);
        let Some(current) = self.current.as_mut() else {
            return Err(ArchiveError::corrupt(offset, "no current entry"));
        };
        let index = current.index;

        let (source, expected_crc) = match body {
            Body::Stored(take) => {
                if take.limit() > 0 {
                    return Err(ArchiveError::corrupt(
                        offset,
                        format!(
                            "entry {index} truncated: {} bytes missing",
                            take.limit()
                        ),
                    ));
                }
                (take.into_inner(), current.expected_crc)
            }
            Body::Deflated(decoder) => {
                let take = decoder.into_inner();
                if take.limit() > 0 {
                    return Err(ArchiveError::corrupt(
                        offset,
                        format!(
                            "entry {index}: deflate data ended with {} of its compressed bytes unread",
                            take.limit()
                        ),
                    ));
                }
                (take.into_inner(), current.expected_crc)
            }
            Body::Streamed(decoder) => {
                let mut source = decoder.into_inner();
                let compressed = source.consumed - current.data_start;
                let descriptor = read_data_descriptor(&mut source, offset)?;
                if u64::from(descriptor.compressed) != compressed
                    || u64::from(descriptor.uncompressed) != current.produced
                {
                    return Err(ArchiveError::corrupt(
                        offset,
                        format!(
                            "entry {index}: data descriptor declares {}/{} bytes, read {compressed}/{}",
                            descriptor.compressed, descriptor.uncompressed, current.produced
                        ),
                    ));
                }
                (source, descriptor.crc)
            }
            Body::Idle(_) | Body::Poisoned => {
                return Err(ArchiveError::corrupt(offset, "entry body is not readable"));
            }
        };

        if let Some(size) = current.declared_size {
            if current.produced != size {
                return Err(ArchiveError::corrupt(
                    offset,
                    format!(
                        "entry {index} produced {} bytes, declared {size}",
                        current.produced
                    ),
                ));
            }
        }

        let actual_crc = std::mem::take(&mut current.hasher).finalize();
        if actual_crc != expected_crc {
            return Err(ArchiveError::corrupt(
                offset,
                format!(
                    "entry {index}: CRC-32 mismatch (expected {expected_crc:08x}, computed {actual_crc:08x})"
                ),
            ));
        }

        current.done = true;
        self.body = Body::Idle(source);
        Ok(())
    }

    fn check_poison(&self) -> ArchiveResult<()> {
        match &self.poison {
            Some(poison) => Err(poison.replay()),
            None => Ok(()),
        }
    }

    /// Poisons the reader for everything but misuse errors.
    fn fail(&mut self, err: ArchiveError) -> ArchiveError {
        if self.poison.is_none() {
            if let Some(poison) = Poison::from_error(&err) {
                debug!("archive reader poisoned: {err}");
                self.poison = Some(poison);
                self.body = Body::Poisoned;
                self.current = None;
            }
        }
        err
    }
}

/// Bounded read view of the current entry's uncompressed content.
///
/// Returns `Ok(0)` at end of entry, after the entry's CRC and sizes have been
/// checked. Errors carry an [`ArchiveError`]; see [`ArchiveError::from_io`].
pub struct EntryReader<'a, R: Read> {
    archive: &'a mut ArchiveReader<R>,
}

impl<R: Read> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.archive.read_entry(buf).map_err(ArchiveError::into_io)
    }
}

// ============================================================================
// Internals
// ============================================================================

/// Source with a consumed-bytes counter and a sticky failure flag, so errors
/// raised by the source can be told apart from decoder errors.
struct Tracked<R> {
    inner: BufReader<R>,
    consumed: u64,
    failed: bool,
}

impl<R: Read> Read for Tracked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.read(buf) {
                Ok(n) => {
                    self.consumed += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
            }
        }
    }
}

impl<R: Read> BufRead for Tracked<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        // Interrupted reads are retried here so they never reach the
        // decoders or the sticky failure flag.
        loop {
            match self.inner.fill_buf() {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
                Ok(_) => break,
            }
        }
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.consumed += amt as u64;
        self.inner.consume(amt);
    }
}

enum Body<R> {
    /// Between entries, positioned at a record signature.
    Idle(Tracked<R>),
    Stored(Take<Tracked<R>>),
    Deflated(DeflateDecoder<Take<Tracked<R>>>),
    /// Deflate with a trailing data descriptor: the stream end is found by
    /// the decoder itself.
    Streamed(DeflateDecoder<Tracked<R>>),
    Poisoned,
}

impl<R> Body<R> {
    fn source(&self) -> Option<&Tracked<R>> {
        match self {
            Body::Idle(s) => Some(s),
            Body::Stored(t) => Some(t.get_ref()),
            Body::Deflated(d) => Some(d.get_ref().get_ref()),
            Body::Streamed(d) => Some(d.get_ref()),
            Body::Poisoned => None,
        }
    }
}

struct Current {
    index: usize,
    kind: EntryKind,
    expected_crc: u32,
    declared_size: Option<u64>,
    data_start: u64,
    produced: u64,
    hasher: crc32fast::Hasher,
    done: bool,
}

enum Poison {
    Corrupt { offset: u64, reason: String },
    Unsupported { offset: u64, feature: String },
    Io { kind: io::ErrorKind, message: String },
}

impl Poison {
    fn from_error(err: &ArchiveError) -> Option<Self> {
        match err {
            ArchiveError::StaleEntry { .. } => None,
            ArchiveError::Corrupt { offset, reason } => Some(Poison::Corrupt {
                offset: *offset,
                reason: reason.clone(),
            }),
            ArchiveError::Unsupported { offset, feature } => Some(Poison::Unsupported {
                offset: *offset,
                feature: feature.clone(),
            }),
            ArchiveError::Io(e) if e.kind() == io::ErrorKind::Interrupted => None,
            ArchiveError::Io(e) => Some(Poison::Io {
                kind: e.kind(),
                message: e.to_string(),
            }),
        }
    }

    fn replay(&self) -> ArchiveError {
        match self {
            Poison::Corrupt { offset, reason } => ArchiveError::corrupt(
                *offset,
                format!("reader stopped after an earlier error: {reason}"),
            ),
            Poison::Unsupported { offset, feature } => {
                ArchiveError::unsupported(*offset, feature.clone())
            }
            Poison::Io { kind, message } => ArchiveError::Io(io::Error::new(
                *kind,
                format!("reader stopped after an earlier error: {message}"),
            )),
        }
    }
}

struct LocalHeader {
    raw_name: String,
    method: u16,
    descriptor: bool,
    crc: u32,
    compressed: u32,
    uncompressed: u32,
}

enum Record {
    Local(LocalHeader),
    /// Central directory reached; the rest of the source was drained.
    End { trailing: u64 },
    /// Clean end of input at a record boundary.
    Eof,
}

fn read_record<R: Read>(source: &mut Tracked<R>, offset: u64) -> ArchiveResult<Record> {
    if source.fill_buf()?.is_empty() {
        return Ok(Record::Eof);
    }

    let mut sig = [0u8; 4];
    read_exact_or(source, &mut sig, offset, "truncated record signature")?;
    match le_u32(&sig) {
        SIG_LFH => {}
        SIG_CDFH | SIG_EOCD | SIG_ZIP64_EOCD | SIG_ZIP64_LOCATOR | SIG_DIGITAL_SIGNATURE => {
            let trailing = io::copy(source, &mut io::sink())?;
            return Ok(Record::End {
                trailing: trailing + sig.len() as u64,
            });
        }
        other => {
            return Err(ArchiveError::corrupt(
                offset,
                format!("unknown record signature {other:#010x}"),
            ));
        }
    }

    let mut fixed = [0u8; LFH_FIXED_LEN];
    read_exact_or(source, &mut fixed, offset, "truncated local file header")?;
    let flags = le_u16(&fixed[2..4]);
    let method = le_u16(&fixed[4..6]);
    let crc = le_u32(&fixed[10..14]);
    let compressed = le_u32(&fixed[14..18]);
    let uncompressed = le_u32(&fixed[18..22]);
    let name_len = le_u16(&fixed[22..24]) as usize;
    let extra_len = le_u16(&fixed[24..26]) as u64;

    let mut name = vec![0u8; name_len];
    read_exact_or(source, &mut name, offset, "truncated entry name")?;
    let skipped = io::copy(&mut source.by_ref().take(extra_len), &mut io::sink())?;
    if skipped != extra_len {
        return Err(ArchiveError::corrupt(offset, "truncated extra field"));
    }
    let raw_name = String::from_utf8_lossy(&name).into_owned();

    if flags & FLAG_ENCRYPTED != 0 {
        return Err(ArchiveError::unsupported(
            offset,
            format!("encrypted entry '{raw_name}'"),
        ));
    }
    if compressed == ZIP64_SENTINEL || uncompressed == ZIP64_SENTINEL {
        return Err(ArchiveError::unsupported(
            offset,
            format!("zip64 entry '{raw_name}'"),
        ));
    }

    let descriptor = flags & FLAG_DATA_DESCRIPTOR != 0;
    match method {
        METHOD_STORED if descriptor => {
            return Err(ArchiveError::unsupported(
                offset,
                format!("stored entry '{raw_name}' without declared size"),
            ));
        }
        METHOD_STORED if compressed != uncompressed => {
            return Err(ArchiveError::corrupt(
                offset,
                format!(
                    "stored entry '{raw_name}' declares {compressed} compressed and {uncompressed} uncompressed bytes"
                ),
            ));
        }
        METHOD_STORED | METHOD_DEFLATED => {}
        other => {
            return Err(ArchiveError::unsupported(
                offset,
                format!("compression method {other} for '{raw_name}'"),
            ));
        }
    }

    Ok(Record::Local(LocalHeader {
        raw_name,
        method,
        descriptor,
        crc,
        compressed,
        uncompressed,
    }))
}

struct DataDescriptor {
    crc: u32,
    compressed: u32,
    uncompressed: u32,
}

fn read_data_descriptor<R: Read>(
    source: &mut Tracked<R>,
    offset: u64,
) -> ArchiveResult<DataDescriptor> {
    let mut word = [0u8; 4];
    read_exact_or(source, &mut word, offset, "truncated data descriptor")?;
    // The descriptor signature is optional.
    if le_u32(&word) == SIG_DATA_DESCRIPTOR {
        read_exact_or(source, &mut word, offset, "truncated data descriptor")?;
    }
    let crc = le_u32(&word);

    let mut sizes = [0u8; 8];
    read_exact_or(source, &mut sizes, offset, "truncated data descriptor")?;
    Ok(DataDescriptor {
        crc,
        compressed: le_u32(&sizes[0..4]),
        uncompressed: le_u32(&sizes[4..8]),
    })
}

fn read_exact_or<R: Read>(
    source: &mut Tracked<R>,
    buf: &mut [u8],
    offset: u64,
    reason: &str,
) -> ArchiveResult<()> {
    match source.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !source.failed => {
            Err(ArchiveError::corrupt(offset, reason))
        }
        Err(e) => Err(ArchiveError::Io(e)),
    }
}

#[inline(always)]
fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

#[inline(always)]
fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
