//! reseal-sink: where re-encrypted entries end up.
//!
//! A strategy receives entries one at a time and hands out a writable target
//! per file. Targets become visible only when finalized.
//!
//! ## Strategies
//!
//! | Strategy               | Use Case                          |
//! |------------------------|-----------------------------------|
//! | `FsEntityStrategy`     | One file per entry under a root   |
//! | `MemoryEntityStrategy` | Tests and embedding               |
//!
//! Both reject entry names that are absolute or contain `..` with
//! [`SinkError::UnsafePath`] before touching any storage.

mod error;
mod fs;
mod memory;
mod strategy;

pub use error::{SinkError, SinkResult};
pub use fs::{CollisionPolicy, FsEntityStrategy, FsStrategyConfig};
pub use memory::{MemoryEntityStrategy, SinkEvent};
pub use strategy::{EntitySinkStrategy, WritableTarget};
