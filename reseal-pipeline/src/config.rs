//! Pipeline configuration.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

/// Default size of the run's copy buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bytes moved per read/write while copying an entry. Allocated once per
    /// run; no single write into a cipher stream exceeds it.
    pub buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.buffer_size == 0 {
            return Err(PipelineError::Config(
                "buffer_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
