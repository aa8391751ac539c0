//! Core types shared across the reseal workspace.
//!
//! Archive entry names are parsed once, when the archive reader decodes a
//! header, into an [`EntryName`]. Every later stage (sink strategies, error
//! reports, logging) works with the normalized segment list instead of the raw
//! archive string.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether an archive entry carries content or only names a directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn is_dir(self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => f.write_str("file"),
            EntryKind::Directory => f.write_str("directory"),
        }
    }
}

/// Logical name of an archive entry.
///
/// Both `/` and `\` are treated as separators. Empty and `.` segments are
/// dropped; `..` segments are kept so that a sink can reject them. A leading
/// separator or a drive prefix (`C:`) marks the name as absolute.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryName {
    segments: Vec<String>,
    absolute: bool,
}

impl EntryName {
    /// Parses a raw archive name.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.replace('\\', "/");
        let mut absolute = normalized.starts_with('/');

        let segments: Vec<String> = normalized
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .map(str::to_string)
            .collect();

        if let Some(first) = segments.first() {
            if is_drive_prefix(first) {
                absolute = true;
            }
        }

        Self { segments, absolute }
    }

    /// Builds a name from already-split segments (used by tests and
    /// in-memory strategies).
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let joined: Vec<String> = segments.into_iter().map(Into::into).collect();
        Self::parse(&joined.join("/"))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True for a relative name with no segments, such as `./`.
    pub fn is_root(&self) -> bool {
        !self.absolute && self.segments.is_empty()
    }

    /// True if any segment is `..`.
    pub fn has_parent_segments(&self) -> bool {
        self.segments.iter().any(|s| s == "..")
    }

    /// True if the name stays below whatever root it is resolved against.
    pub fn is_contained(&self) -> bool {
        !self.absolute && !self.has_parent_segments() && !self.is_empty()
    }

    /// Last segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// All proper prefixes of this name, shortest first (`a`, `a/b` for `a/b/c`).
    pub fn ancestors(&self) -> impl Iterator<Item = EntryName> + '_ {
        (1..self.segments.len()).map(move |n| EntryName {
            segments: self.segments[..n].to_vec(),
            absolute: self.absolute,
        })
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute && !self.segments.first().is_some_and(|s| is_drive_prefix(s)) {
            f.write_str("/")?;
        }
        f.write_str(&self.segments.join("/"))
    }
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
