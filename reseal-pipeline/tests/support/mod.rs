//! Fixtures shared by pipeline tests: archives, keys, and instrumented
//! factories and sinks.

#![allow(dead_code)]

use reseal_crypto::{
    generate_key, CipherStreamFactory, CryptoError, CryptoResult, DecryptionFactory,
    EncryptionFactory, KdfParams, Keyring, PublicKeyring, SealingWrite, SecretKeyring,
    StreamConfig,
};
use reseal_sink::{EntitySinkStrategy, MemoryEntityStrategy, SinkEvent, SinkResult, WritableTarget};
use reseal_types::EntryName;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const PASS: &str = "pipeline test";
pub const CHUNK: usize = 1024;
pub const TAG: usize = 16;

// ============================================================================
// Archives
// ============================================================================

pub enum Item<'a> {
    Dir(&'a str),
    Stored(&'a str, &'a [u8]),
    Deflated(&'a str, &'a [u8]),
}

/// Builds an archive with the `zip` crate.
pub fn zip(items: &[Item<'_>]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for item in items {
        match item {
            Item::Dir(name) => writer.add_directory(*name, stored).unwrap(),
            Item::Stored(name, data) => {
                writer.start_file(*name, stored).unwrap();
                writer.write_all(data).unwrap();
            }
            Item::Deflated(name, data) => {
                writer.start_file(*name, deflated).unwrap();
                writer.write_all(data).unwrap();
            }
        }
    }
    writer.finish().unwrap().into_inner()
}

/// Stored local entries with no central directory, names written verbatim.
pub fn raw_stored(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, data) in entries {
        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // stored
        out.extend_from_slice(&0u32.to_le_bytes()); // time, date
        out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);
    }
    out
}

pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Archive bytes served in small reads, with injected source failures.
pub struct FlakySource {
    data: Vec<u8>,
    pos: usize,
    calls: usize,
    /// Every n-th read call is interrupted before it reads anything.
    pub interrupt_every: Option<usize>,
    /// Offset at which the source goes away for good.
    pub fail_at: Option<usize>,
}

impl FlakySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            calls: 0,
            interrupt_every: None,
            fail_at: None,
        }
    }
}

impl Read for FlakySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.calls += 1;
        if self.interrupt_every.is_some_and(|n| self.calls % n == 0) {
            return Err(io::Error::from(io::ErrorKind::Interrupted));
        }
        if self.fail_at.is_some_and(|at| self.pos >= at) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "source went away",
            ));
        }
        let end = self.fail_at.map_or(self.data.len(), |at| at.min(self.data.len()));
        let n = buf.len().min(end - self.pos).min(100);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

// ============================================================================
// Keys
// ============================================================================

/// Alice signs, Bob receives; both secrets unlocked.
pub fn keyring() -> Keyring {
    let mut public = PublicKeyring::new();
    let mut secret = SecretKeyring::new();
    for user in ["alice", "bob"] {
        let (pk, sk) = generate_key(user, PASS, &KdfParams::insecure_fast()).unwrap();
        public.insert(pk);
        secret.insert(sk);
    }
    Keyring::unlock(public, &secret, PASS).unwrap()
}

pub fn encryption_factory(keyring: &Keyring) -> EncryptionFactory {
    EncryptionFactory::new(keyring, "bob", "alice", StreamConfig { chunk_size: CHUNK }).unwrap()
}

/// Seals `plaintext` the way an incoming encrypted archive would arrive.
pub fn seal(keyring: &Keyring, plaintext: &[u8]) -> Vec<u8> {
    let mut writer = encryption_factory(keyring)
        .encrypt_and_sign(Vec::new())
        .unwrap();
    writer.write_all(plaintext).unwrap();
    writer.finish().unwrap()
}

/// Decrypts a re-encrypted entry and checks that Alice signed it.
pub fn open(keyring: &Keyring, sealed: &[u8]) -> Vec<u8> {
    let mut reader = DecryptionFactory::new(keyring)
        .decrypt_and_verify(sealed)
        .unwrap();
    let mut plaintext = Vec::new();
    reader.read_to_end(&mut plaintext).unwrap();
    let verification = reader.finish().unwrap();
    assert_eq!(verification.signer_user_id, "alice");
    plaintext
}

pub fn finalized_count(sink: &MemoryEntityStrategy) -> usize {
    sink.events()
        .iter()
        .filter(|e| matches!(e, SinkEvent::Finalize(_)))
        .count()
}

// ============================================================================
// Instrumented factory
// ============================================================================

/// Pass-through "cipher" that records what the pipeline does with it.
///
/// Output is the plaintext itself, so tests can compare sink contents
/// directly without paying for real keys.
#[derive(Clone, Default)]
pub struct RecordingFactory {
    pub log: Arc<Mutex<Vec<String>>>,
    pub largest_write: Arc<Mutex<usize>>,
    /// Sink observed when each stream is finished.
    pub observer: Option<MemoryEntityStrategy>,
    /// Zero-based stream number whose `finish` fails.
    pub fail_finish_at: Option<usize>,
    pub opened: Arc<Mutex<usize>>,
}

impl RecordingFactory {
    pub fn observing(sink: &MemoryEntityStrategy) -> Self {
        Self {
            observer: Some(sink.clone()),
            ..Self::default()
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn largest_write(&self) -> usize {
        *self.largest_write.lock().unwrap()
    }
}

pub struct Recorded<W> {
    inner: W,
    number: usize,
    factory: RecordingFactory,
}

impl<W: Write> Write for Recorded<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut largest = self.factory.largest_write.lock().unwrap();
        *largest = (*largest).max(buf.len());
        drop(largest);
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> SealingWrite<W> for Recorded<W> {
    fn finish(mut self) -> CryptoResult<W> {
        if self.factory.fail_finish_at == Some(self.number) {
            return Err(CryptoError::Encryption("trailer rejected".into()));
        }
        let finalized = self.factory.observer.as_ref().map_or(0, finalized_count);
        self.factory
            .log
            .lock()
            .unwrap()
            .push(format!("finish {} (finalized so far: {finalized})", self.number));
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl CipherStreamFactory for RecordingFactory {
    type Output<W: Write> = Recorded<W>;

    fn encrypt_and_sign<W: Write>(&self, raw: W) -> CryptoResult<Recorded<W>> {
        let mut opened = self.opened.lock().unwrap();
        let number = *opened;
        *opened += 1;
        self.log.lock().unwrap().push(format!("open {number}"));
        Ok(Recorded {
            inner: raw,
            number,
            factory: self.clone(),
        })
    }
}

// ============================================================================
// Failing sink
// ============================================================================

/// Accepts `limit` bytes per target, then fails every write.
pub struct FullDisk {
    pub limit: usize,
}

struct FullTarget {
    remaining: usize,
}

impl Write for FullTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() > self.remaining {
            return Err(io::Error::other("no space left on device"));
        }
        self.remaining -= buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WritableTarget for FullTarget {
    fn finalize(self: Box<Self>) -> SinkResult<()> {
        Ok(())
    }
}

impl EntitySinkStrategy for FullDisk {
    fn create_directory(&mut self, _name: &EntryName) -> SinkResult<()> {
        Ok(())
    }

    fn open(&mut self, _name: &EntryName) -> SinkResult<Box<dyn WritableTarget>> {
        Ok(Box::new(FullTarget {
            remaining: self.limit,
        }))
    }
}
