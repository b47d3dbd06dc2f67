use bytes::Bytes;

use crate::error::Result;
use crate::storage::Log;

/// The contract between a commit log and the transports serving it.
///
/// Implementations assign dense, monotonically increasing offsets in append order. A read of an
/// offset that is not (or no longer) in the log fails with
/// [`LogError::OffsetNotFound`](crate::LogError::OffsetNotFound).
pub trait CommitLog: Send + Sync {
    /// Appends a record and returns its offset.
    fn append(&self, record: &[u8]) -> Result<u64>;

    /// Reads the record at given `offset`.
    fn read(&self, offset: u64) -> Result<Bytes>;
}

impl CommitLog for Log {
    #[inline]
    fn append(&self, record: &[u8]) -> Result<u64> {
        Log::append(self, record)
    }

    #[inline]
    fn read(&self, offset: u64) -> Result<Bytes> {
        Log::read(self, offset)
    }
}
