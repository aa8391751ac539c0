//! In-memory strategy (for tests and embedding).

use crate::error::{SinkError, SinkResult};
use crate::strategy::{EntitySinkStrategy, WritableTarget};
use reseal_types::EntryName;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// A call observed by a [`MemoryEntityStrategy`], in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    CreateDirectory(String),
    Open(String),
    Finalize(String),
    /// A target dropped without being finalized.
    Discard(String),
}

#[derive(Default)]
struct MemoryState {
    events: Vec<SinkEvent>,
    files: BTreeMap<String, Vec<u8>>,
    directories: Vec<String>,
    largest_write: usize,
}

/// Keeps finalized entries in memory, keyed by their normalized name.
///
/// Applies the same traversal guard as the filesystem strategy and always
/// fails on collisions. Clones share the same store, so a test can hand one
/// clone to the pipeline and inspect the other.
#[derive(Clone, Default)]
pub struct MemoryEntityStrategy {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEntityStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock().map(|s| s.events.clone()).unwrap_or_default()
    }

    /// Finalized files by name.
    pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
        self.lock().map(|s| s.files.clone()).unwrap_or_default()
    }

    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().ok().and_then(|s| s.files.get(name).cloned())
    }

    pub fn directories(&self) -> Vec<String> {
        self.lock().map(|s| s.directories.clone()).unwrap_or_default()
    }

    /// Largest single `write` call any target has received.
    pub fn largest_write(&self) -> usize {
        self.lock().map(|s| s.largest_write).unwrap_or_default()
    }

    fn lock(&self) -> SinkResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| SinkError::Storage(e.to_string()))
    }
}

fn checked_key(name: &EntryName) -> SinkResult<String> {
    if !name.is_contained() {
        return Err(SinkError::UnsafePath(name.to_string()));
    }
    Ok(name.to_string())
}

impl EntitySinkStrategy for MemoryEntityStrategy {
    fn create_directory(&mut self, name: &EntryName) -> SinkResult<()> {
        if name.is_root() {
            return Ok(());
        }
        let key = checked_key(name)?;
        let mut state = self.lock()?;
        if state.files.contains_key(&key) {
            return Err(SinkError::Collision(key));
        }
        state.events.push(SinkEvent::CreateDirectory(key.clone()));
        if !state.directories.contains(&key) {
            state.directories.push(key);
        }
        Ok(())
    }

    fn open(&mut self, name: &EntryName) -> SinkResult<Box<dyn WritableTarget>> {
        let key = checked_key(name)?;
        let mut state = self.lock()?;
        if state.files.contains_key(&key) || state.directories.contains(&key) {
            return Err(SinkError::Collision(key));
        }
        state.events.push(SinkEvent::Open(key.clone()));
        Ok(Box::new(MemoryTarget {
            key,
            buffer: Vec::new(),
            state: Arc::clone(&self.state),
            finalized: false,
        }))
    }
}

struct MemoryTarget {
    key: String,
    buffer: Vec<u8>,
    state: Arc<Mutex<MemoryState>>,
    finalized: bool,
}

impl Write for MemoryTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut state) = self.state.lock() {
            state.largest_write = state.largest_write.max(buf.len());
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WritableTarget for MemoryTarget {
    fn finalize(mut self: Box<Self>) -> SinkResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| SinkError::Storage(e.to_string()))?;
        if state.files.contains_key(&self.key) {
            return Err(SinkError::Collision(self.key.clone()));
        }
        let bytes = std::mem::take(&mut self.buffer);
        state.files.insert(self.key.clone(), bytes);
        state.events.push(SinkEvent::Finalize(self.key.clone()));
        drop(state);
        self.finalized = true;
        Ok(())
    }
}

impl Drop for MemoryTarget {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            state.events.push(SinkEvent::Discard(self.key.clone()));
        }
    }
}
