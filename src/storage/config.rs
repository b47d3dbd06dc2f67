use crate::error::{LogError, Result};
use crate::storage::segment::ENTRY_WIDTH;

/// Configuration of a [`Log`](crate::storage::Log).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub segment: SegmentConfig,
}

/// Per-segment limits, fixed for the lifetime of a log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentConfig {
    /// Store size after which the segment is rotated
    pub max_store_bytes: u64,
    /// Index capacity (the size the index file is pre-sized and mapped to)
    pub max_index_bytes: u64,
    /// Base offset of the first segment of a new (empty) log
    pub initial_offset: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_store_bytes: 1024 * 1024,
            max_index_bytes: 1024 * ENTRY_WIDTH,
            initial_offset: 0,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let SegmentConfig {
            max_store_bytes,
            max_index_bytes,
            ..
        } = self.segment;

        if max_store_bytes == 0 {
            return Err(LogError::InvalidConfig(
                "max_store_bytes must be positive".to_string(),
            ));
        }

        if max_index_bytes < ENTRY_WIDTH {
            return Err(LogError::InvalidConfig(format!(
                "max_index_bytes ({max_index_bytes}) must fit at least one {ENTRY_WIDTH}B entry"
            )));
        }

        // relative offsets are stored as u32
        if max_index_bytes / ENTRY_WIDTH > u64::from(u32::MAX) {
            return Err(LogError::InvalidConfig(format!(
                "max_index_bytes ({max_index_bytes}) exceeds the addressable number of entries"
            )));
        }

        Ok(())
    }
}
