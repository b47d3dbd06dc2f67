//! Vector-backed commit log, for tests and transports that don't need durability.

use bytes::Bytes;
use parking_lot::RwLock;

use crate::commit_log::CommitLog;
use crate::error::{LogError, Result};

#[derive(Debug, Default)]
pub struct InMemoryLog {
    /// records indexed by their offsets
    records: RwLock<Vec<Bytes>>,
}

impl InMemoryLog {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl CommitLog for InMemoryLog {
    fn append(&self, record: &[u8]) -> Result<u64> {
        let mut records = self.records.write();
        let offset = records.len() as u64;
        records.push(Bytes::copy_from_slice(record));
        Ok(offset)
    }

    fn read(&self, offset: u64) -> Result<Bytes> {
        usize::try_from(offset)
            .ok()
            .and_then(|ix| self.records.read().get(ix).cloned())
            .ok_or(LogError::OffsetNotFound(offset))
    }
}
