//! Filesystem strategy: one file per entry below a root directory.
//!
//! Layout mirrors the archive: `dir/a.txt` becomes `<root>/dir/a.txt<suffix>`.
//! Each file is written to a hidden `.reseal-<n>.partial` sibling, synced,
//! and renamed into place on finalize, so a file with the final name is
//! always complete. The temporary name has a fixed length, so any destination
//! name the filesystem accepts can be written.

use crate::error::{SinkError, SinkResult};
use crate::strategy::{EntitySinkStrategy, WritableTarget};
use reseal_types::EntryName;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What to do when a file entry's destination already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Fail with [`SinkError::Collision`].
    #[default]
    Fail,
    /// Replace the existing file. A directory is never replaced.
    Overwrite,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsStrategyConfig {
    /// Appended to every file entry's name.
    pub file_suffix: String,
    pub collision: CollisionPolicy,
}

impl Default for FsStrategyConfig {
    fn default() -> Self {
        Self {
            file_suffix: ".rsl".to_string(),
            collision: CollisionPolicy::Fail,
        }
    }
}

pub struct FsEntityStrategy {
    root: PathBuf,
    config: FsStrategyConfig,
    next_partial: u64,
}

impl FsEntityStrategy {
    /// Creates the root directory if it does not exist.
    pub fn new(root: impl AsRef<Path>, config: FsStrategyConfig) -> SinkResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| SinkError::io(&root, e))?;
        Ok(Self {
            root,
            config,
            next_partial: 0,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &FsStrategyConfig {
        &self.config
    }

    /// Maps an entry name below the root, rejecting anything that could
    /// escape it.
    pub fn resolve(&self, name: &EntryName) -> SinkResult<PathBuf> {
        if !name.is_contained() {
            return Err(SinkError::UnsafePath(name.to_string()));
        }
        let mut path = self.root.clone();
        for segment in name.segments() {
            if !is_plain_segment(segment) {
                return Err(SinkError::UnsafePath(name.to_string()));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn file_path(&self, name: &EntryName) -> SinkResult<PathBuf> {
        let mut path = self.resolve(name)?;
        let mut file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| SinkError::UnsafePath(name.to_string()))?;
        file_name.push(&self.config.file_suffix);
        path.set_file_name(file_name);
        Ok(path)
    }

    /// Creates a fresh temporary file in `parent`, skipping names left behind
    /// by other writers.
    fn create_partial(&mut self, parent: &Path) -> SinkResult<(File, PathBuf)> {
        loop {
            let partial = parent.join(format!(".reseal-{}.partial", self.next_partial));
            self.next_partial += 1;
            match OpenOptions::new().write(true).create_new(true).open(&partial) {
                Ok(file) => return Ok((file, partial)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(SinkError::io(&partial, e)),
            }
        }
    }
}

impl EntitySinkStrategy for FsEntityStrategy {
    fn create_directory(&mut self, name: &EntryName) -> SinkResult<()> {
        if name.is_root() {
            debug!("directory entry names the root; nothing to create");
            return Ok(());
        }
        let path = self.resolve(name)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => return Err(SinkError::Collision(path.display().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SinkError::io(&path, e)),
        }
        fs::create_dir_all(&path).map_err(|e| SinkError::io(&path, e))?;
        debug!("created directory {}", path.display());
        Ok(())
    }

    fn open(&mut self, name: &EntryName) -> SinkResult<Box<dyn WritableTarget>> {
        let dest = self.file_path(name)?;
        match fs::symlink_metadata(&dest) {
            Ok(meta) if meta.is_dir() => {
                return Err(SinkError::Collision(dest.display().to_string()));
            }
            Ok(_) if self.config.collision == CollisionPolicy::Fail => {
                return Err(SinkError::Collision(dest.display().to_string()));
            }
            Ok(_) => debug!("overwriting {}", dest.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SinkError::io(&dest, e)),
        }

        let parent = dest
            .parent()
            .ok_or_else(|| SinkError::UnsafePath(name.to_string()))?;
        fs::create_dir_all(parent).map_err(|e| SinkError::io(parent, e))?;

        let (file, partial) = self.create_partial(parent)?;

        debug!("opened {} for {name}", partial.display());
        Ok(Box::new(FsTarget {
            file: Some(BufWriter::new(file)),
            partial,
            dest,
            collision: self.config.collision,
            finalized: false,
        }))
    }
}

struct FsTarget {
    file: Option<BufWriter<File>>,
    partial: PathBuf,
    dest: PathBuf,
    collision: CollisionPolicy,
    finalized: bool,
}

impl FsTarget {
    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("target already finalized"))
    }
}

impl Write for FsTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl WritableTarget for FsTarget {
    fn finalize(mut self: Box<Self>) -> SinkResult<()> {
        let writer = self
            .file
            .take()
            .ok_or_else(|| SinkError::io(&self.partial, io::Error::other("target already finalized")))?;
        let file = writer
            .into_inner()
            .map_err(|e| SinkError::io(&self.partial, e.into_error()))?;
        file.sync_all().map_err(|e| SinkError::io(&self.partial, e))?;
        drop(file);

        // The destination may have appeared while this entry was written.
        if self.collision == CollisionPolicy::Fail && fs::symlink_metadata(&self.dest).is_ok() {
            return Err(SinkError::Collision(self.dest.display().to_string()));
        }
        fs::rename(&self.partial, &self.dest).map_err(|e| SinkError::io(&self.dest, e))?;
        self.finalized = true;
        debug!("finalized {}", self.dest.display());
        Ok(())
    }
}

impl Drop for FsTarget {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        self.file.take();
        if let Err(e) = fs::remove_file(&self.partial) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove {}: {e}", self.partial.display());
            }
        }
    }
}

/// Rejects segments that are empty, relative markers, or carry characters a
/// filesystem would interpret rather than store.
fn is_plain_segment(segment: &str) -> bool {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\0') {
        return false;
    }
    !(cfg!(windows) && segment.contains(':'))
}
