//! The strategy contract shared by all sinks.

use crate::error::SinkResult;
use reseal_types::EntryName;
use std::io::Write;

/// Decides where and how each re-encrypted entry is stored.
///
/// Called once per entry, in archive order. At most one target is open at a
/// time: the caller finalizes (or drops) a target before asking for the next.
pub trait EntitySinkStrategy {
    /// Materializes a directory entry. An existing directory is not an error.
    fn create_directory(&mut self, name: &EntryName) -> SinkResult<()>;

    /// Opens the destination for a file entry.
    fn open(&mut self, name: &EntryName) -> SinkResult<Box<dyn WritableTarget>>;
}

/// One destination being written.
///
/// Bytes written are not visible as a complete entry until
/// [`finalize`](WritableTarget::finalize) succeeds. Dropping a target without
/// finalizing discards it.
pub trait WritableTarget: Write {
    fn finalize(self: Box<Self>) -> SinkResult<()>;
}

impl<S: EntitySinkStrategy + ?Sized> EntitySinkStrategy for &mut S {
    fn create_directory(&mut self, name: &EntryName) -> SinkResult<()> {
        (**self).create_directory(name)
    }

    fn open(&mut self, name: &EntryName) -> SinkResult<Box<dyn WritableTarget>> {
        (**self).open(name)
    }
}
