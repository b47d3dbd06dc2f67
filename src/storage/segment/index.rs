use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{LogError, Result};

/// Width of the relative offset field of an index entry
pub const OFF_WIDTH: u64 = 4;
/// Width of the store position field of an index entry
pub const POS_WIDTH: u64 = 8;
/// Width of a single index entry
pub const ENTRY_WIDTH: u64 = OFF_WIDTH + POS_WIDTH;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    /// offset relative to the segment's base offset
    pub relative_offset: u32,
    /// byte offset of the record within the store
    pub position: u64,
}

/// Memory-mapped index of record offset-to-position for a corresponding store file.
///
/// The file is serialized as a sequence of 12B entries `[u32 BE relative offset][u64 BE position]`.
/// While open, the file is pre-sized to its full capacity (`max_index_bytes`) and mapped, so that
/// appending an entry is a plain memory write. Only the first `size` bytes hold valid entries and
/// [`Index::close`] truncates the file back down to them.
///
/// [Reference implementation](https://github.com/apache/kafka/blob/50b6953661a46d7d57a8aca5c875e91a19166253/storage/src/main/java/org/apache/kafka/storage/internals/log/OffsetIndex.java)
#[derive(Debug)]
pub struct Index {
    /// file location
    path: PathBuf,
    /// open index file
    file: File,
    /// the whole (pre-sized) index file mapped into memory
    mmap: MmapMut,
    /// number of valid bytes, always a multiple of [`ENTRY_WIDTH`]
    size: u64,
}

impl Index {
    /// Opens (or creates) the index file at `path` with capacity of `max_index_bytes`.
    ///
    /// The logical size is restored from the length of the file as found on disk, i.e., before the
    /// file is extended to its capacity.
    pub fn open(path: impl AsRef<Path>, max_index_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();

        if len > max_index_bytes {
            return Err(LogError::corrupt(
                path,
                format!("index length ({len}B) exceeds its capacity ({max_index_bytes}B)"),
            ));
        }

        let size = len - len % ENTRY_WIDTH;

        file.set_len(max_index_bytes)?;

        // SAFETY: The log directory is owned exclusively by a single log instance, so the file is
        // not modified externally and its length stays fixed until the map is dropped.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            path,
            file,
            mmap,
            size,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of valid bytes in the index
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of bytes the index can hold
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Number of entries in the index
    #[inline]
    pub fn len(&self) -> u64 {
        self.size / ENTRY_WIDTH
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns `true` if there is no room for another entry.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.size + ENTRY_WIDTH > self.capacity()
    }

    /// Reads the `entry`-th index entry, where `-1` stands for the last one.
    ///
    /// Returns `None` if the index is empty or the entry has not been written.
    pub fn read(&self, entry: i64) -> Option<IndexEntry> {
        if self.is_empty() {
            return None;
        }

        let entry = match entry {
            -1 => self.len() - 1,
            entry => u64::try_from(entry).ok()?,
        };

        let start = entry.checked_mul(ENTRY_WIDTH)?;

        if start.checked_add(ENTRY_WIDTH)? > self.size {
            return None;
        }

        let start = start as usize;
        let mid = start + OFF_WIDTH as usize;
        let end = start + ENTRY_WIDTH as usize;

        let mut relative_offset = [0; OFF_WIDTH as usize];
        relative_offset.copy_from_slice(&self.mmap[start..mid]);

        let mut position = [0; POS_WIDTH as usize];
        position.copy_from_slice(&self.mmap[mid..end]);

        Some(IndexEntry {
            relative_offset: u32::from_be_bytes(relative_offset),
            position: u64::from_be_bytes(position),
        })
    }

    /// Reads the last entry of the index (if any).
    #[inline]
    pub fn last(&self) -> Option<IndexEntry> {
        self.read(-1)
    }

    /// Appends new entry to the index.
    ///
    /// Fails with [`LogError::CapacityExceeded`] if the entry does not fit into the mapped file.
    pub fn write(&mut self, relative_offset: u32, position: u64) -> Result<()> {
        if self.is_full() {
            return Err(LogError::CapacityExceeded);
        }

        let start = self.size as usize;
        let mid = start + OFF_WIDTH as usize;
        let end = start + ENTRY_WIDTH as usize;

        self.mmap[start..mid].copy_from_slice(&relative_offset.to_be_bytes());
        self.mmap[mid..end].copy_from_slice(&position.to_be_bytes());

        self.size += ENTRY_WIDTH;

        Ok(())
    }

    /// Keeps just the first `entries` entries (used when recovering a segment).
    pub(crate) fn truncate(&mut self, entries: u64) {
        self.size = self.size.min(entries.saturating_mul(ENTRY_WIDTH));
    }

    /// Syncs the mapped entries to disk, truncates the file to the valid entries and closes it.
    pub fn close(self) -> Result<()> {
        let Self {
            file, mmap, size, ..
        } = self;

        // NOTE: the order matters, truncating before the map is synced may lose mapped entries
        mmap.flush()?;
        file.sync_all()?;
        drop(mmap);

        file.set_len(size)?;
        file.sync_all()?;

        Ok(())
    }
}
