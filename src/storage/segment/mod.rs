use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{LogError, Result};
use crate::storage::SegmentConfig;

pub use self::index::{Index, IndexEntry, ENTRY_WIDTH};
pub use self::store::{Store, LEN_WIDTH};

pub mod index;
pub mod store;

/// File extension of segment store files
pub const STORE_EXT: &str = "store";
/// File extension of segment index files
pub const INDEX_EXT: &str = "index";

/// Structure representing a log segment.
///
/// A segment is a pair of files sharing a base offset (contained in their names):
///  - A _store_, which holds the raw length-prefixed records
///  - An _index_, which maps offsets (relative to the base offset) to record positions within the
///    store, so that a lookup never has to scan the store
///
/// Segments are immutable modulo the last (active) one, which is append-only, and are only
/// discarded by the log's retention truncation.
#[derive(Debug)]
pub struct Segment {
    base_offset: u64,
    store: Store,
    /// guards the store-append + index-append pair and the offset assignment
    state: RwLock<SegmentState>,
    config: SegmentConfig,
}

#[derive(Debug)]
struct SegmentState {
    index: Index,
    /// offset of the next appended record
    next_offset: u64,
}

impl Segment {
    /// Opens (or creates) the segment with given `base_offset` in `dir`.
    ///
    /// Existing files are reconciled first: index entries that do not point to complete records
    /// are dropped and store bytes not covered by the index are truncated.
    pub fn open(dir: impl AsRef<Path>, base_offset: u64, config: SegmentConfig) -> Result<Self> {
        let dir = dir.as_ref();

        let store = Store::open(store_path(dir, base_offset))?;
        let mut index = Index::open(index_path(dir, base_offset), config.max_index_bytes)?;

        recover(&store, &mut index)?;

        let next_offset = base_offset + index.len();

        debug!(base_offset, next_offset, dir = %dir.display(), "opened segment");

        Ok(Self {
            base_offset,
            store,
            state: RwLock::new(SegmentState { index, next_offset }),
            config,
        })
    }

    #[inline]
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    #[inline]
    pub fn next_offset(&self) -> u64 {
        self.state.read().next_offset
    }

    /// Number of records in this segment
    #[inline]
    pub fn len(&self) -> u64 {
        self.next_offset() - self.base_offset
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn contains(&self, offset: u64) -> bool {
        self.base_offset <= offset && offset < self.next_offset()
    }

    #[inline]
    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    /// Returns `true` once either the store or the index reached its configured size.
    pub fn is_maxed(&self) -> bool {
        self.store.size() >= self.config.max_store_bytes || self.state.read().index.is_full()
    }

    /// Appends a record and returns its (absolute) offset.
    ///
    /// Fails with [`LogError::CapacityExceeded`] without touching the store if the index is full.
    pub fn append(&self, payload: &[u8]) -> Result<u64> {
        let mut state = self.state.write();

        if state.index.is_full() {
            return Err(LogError::CapacityExceeded);
        }

        let offset = state.next_offset;

        let relative_offset =
            u32::try_from(offset - self.base_offset).map_err(|_| LogError::CapacityExceeded)?;

        let (_, position) = self.store.append(payload)?;

        // an unindexed record would shift every later position
        if let Err(e) = state.index.write(relative_offset, position) {
            self.store.truncate(position)?;
            return Err(e);
        }

        state.next_offset += 1;

        Ok(offset)
    }

    /// Reads the record with given (absolute) `offset`.
    pub fn read(&self, offset: u64) -> Result<Bytes> {
        let entry = {
            let state = self.state.read();

            offset
                .checked_sub(self.base_offset)
                .and_then(|relative| i64::try_from(relative).ok())
                .and_then(|relative| state.index.read(relative))
                .ok_or(LogError::OffsetNotFound(offset))?
        };

        self.store.read(entry.position)
    }

    /// Reads the last record of this segment together with its offset.
    pub fn read_last(&self) -> Result<Option<(u64, Bytes)>> {
        let Some(entry) = self.state.read().index.last() else {
            return Ok(None);
        };

        let offset = self.base_offset + u64::from(entry.relative_offset);
        let record = self.store.read(entry.position)?;

        Ok(Some((offset, record)))
    }

    /// Reads raw store bytes, see [`Store::read_at`].
    #[inline]
    pub fn read_at(&self, buf: &mut [u8], position: u64) -> Result<usize> {
        self.store.read_at(buf, position)
    }

    /// Closes both the index and the store.
    ///
    /// Closing is attempted for both files and the first error is reported.
    pub fn close(self) -> Result<()> {
        let Self {
            base_offset,
            store,
            state,
            ..
        } = self;

        let SegmentState { index, .. } = state.into_inner();

        let index = index.close();
        let store = store.close();

        debug!(base_offset, "closed segment");

        index.and(store)
    }

    /// Closes the segment and deletes its files.
    pub fn remove(self) -> Result<()> {
        let base_offset = self.base_offset;
        let store = self.store.path().to_path_buf();
        let index = self.state.read().index.path().to_path_buf();

        self.close()?;

        fs::remove_file(&index)?;
        fs::remove_file(&store)?;

        debug!(base_offset, "removed segment");

        Ok(())
    }
}

#[inline]
pub(crate) fn store_path(dir: &Path, base_offset: u64) -> PathBuf {
    dir.join(format!("{base_offset}.{STORE_EXT}"))
}

#[inline]
pub(crate) fn index_path(dir: &Path, base_offset: u64) -> PathBuf {
    dir.join(format!("{base_offset}.{INDEX_EXT}"))
}

/// Cuts the index and the store down to their longest consistent prefix.
///
/// Index entry `k` is valid iff its relative offset is `k`, it points to the `k`-th record of the
/// store, and the record lies within the store.
fn recover(store: &Store, index: &mut Index) -> Result<()> {
    let store_size = store.size();

    let mut valid = 0;
    let mut position = 0;
    let mut len = [0; LEN_WIDTH as usize];

    while let Some(entry) = index.read(valid as i64) {
        if u64::from(entry.relative_offset) != valid || entry.position != position {
            break;
        }

        if store.read_at(&mut len, position)? < len.len() {
            break;
        }

        let end = (position + LEN_WIDTH).checked_add(u64::from_be_bytes(len));

        match end {
            Some(end) if end <= store_size => position = end,
            _ => break,
        }

        valid += 1;
    }

    if valid < index.len() {
        warn!(
            index = %index.path().display(),
            entries = index.len(),
            valid,
            "dropping index entries without a complete record"
        );
        index.truncate(valid);
    }

    if position < store_size {
        warn!(
            store = %store.path().display(),
            size = store_size,
            position,
            "truncating store bytes not covered by the index"
        );
        store.truncate(position)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::Write as _;

    use super::*;

    const RECORD: &[u8] = b"hello world";
    const WIDTH: u64 = LEN_WIDTH + RECORD.len() as u64;

    fn config(max_store_bytes: u64, max_index_bytes: u64) -> SegmentConfig {
        SegmentConfig {
            max_store_bytes,
            max_index_bytes,
            initial_offset: 0,
        }
    }

    #[test]
    fn append_read_until_index_maxed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config(1024, 3 * ENTRY_WIDTH);

        let segment = Segment::open(dir.path(), 16, config).expect("open segment");
        assert_eq!(16, segment.next_offset());
        assert!(!segment.is_maxed());
        assert!(segment.is_empty());

        for i in 0..3 {
            let offset = segment.append(RECORD).expect("append record");
            assert_eq!(16 + i, offset);

            let record = segment.read(offset).expect("read record");
            assert_eq!(RECORD, &record[..]);
        }

        assert!(segment.is_maxed());

        let err = segment.append(RECORD).expect_err("index is full");
        assert!(matches!(err, LogError::CapacityExceeded));
        assert_eq!(3 * WIDTH, segment.store.size(), "store untouched by failed append");

        assert!(segment.read(15).unwrap_err().is_offset_not_found());
        assert!(segment.read(19).unwrap_err().is_offset_not_found());
    }

    #[test]
    fn store_maxed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config(3 * WIDTH, 1024);

        let segment = Segment::open(dir.path(), 0, config).expect("open segment");

        for _ in 0..2 {
            segment.append(RECORD).expect("append record");
            assert!(!segment.is_maxed());
        }

        segment.append(RECORD).expect("append record");
        assert!(segment.is_maxed());
    }

    #[test]
    fn read_last() {
        let dir = tempfile::tempdir().expect("temp dir");
        let segment = Segment::open(dir.path(), 5, config(1024, 1024)).expect("open segment");

        assert!(segment.read_last().expect("read last").is_none());

        segment.append(b"first").expect("append record");
        segment.append(b"second").expect("append record");

        let (offset, record) = segment
            .read_last()
            .expect("read last")
            .expect("non-empty segment");

        assert_eq!(6, offset);
        assert_eq!(b"second", &record[..]);
    }

    #[test]
    fn failed_append_keeps_offsets_readable() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config(1 << 20, 1024);

        let segment = Segment::open(dir.path(), 0, config).expect("open segment");
        assert_eq!(0, segment.append(&[0; 100]).expect("append record"));

        segment
            .store
            .set_quota(Some(store::Quota::Transient(10_000)));
        segment
            .append(&[1; 20_000])
            .expect_err("store file quota exceeded");
        assert_eq!(1, segment.next_offset());

        assert_eq!(1, segment.append(b"third").expect("append after failure"));
        assert_eq!(b"third", &segment.read(1).expect("read record")[..]);

        segment.close().expect("close segment");

        let segment = Segment::open(dir.path(), 0, config).expect("reopen segment");
        assert_eq!(2, segment.next_offset());
        assert_eq!(&[0; 100][..], &segment.read(0).expect("read record")[..]);
        assert_eq!(b"third", &segment.read(1).expect("read record")[..]);
    }

    #[test]
    fn reopen_restores_state() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config(1024, 1024);

        let segment = Segment::open(dir.path(), 16, config).expect("open segment");
        for _ in 0..3 {
            segment.append(RECORD).expect("append record");
        }
        segment.close().expect("close segment");

        let segment = Segment::open(dir.path(), 16, config).expect("reopen segment");
        assert_eq!(19, segment.next_offset());
        assert!(!segment.is_maxed());

        for offset in 16..19 {
            assert_eq!(RECORD, &segment.read(offset).expect("read record")[..]);
        }

        assert_eq!(19, segment.append(b"next").expect("append after reopen"));
    }

    #[test]
    fn recover_unclean_shutdown() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config(1024, 1024);

        let segment = Segment::open(dir.path(), 0, config).expect("open segment");
        segment.append(b"first").expect("append record");
        segment.append(b"second").expect("append record");

        // no close: the index file stays pre-sized with a zeroed tail
        drop(segment);

        let index = index_path(dir.path(), 0);
        assert_eq!(1024, fs::metadata(&index).expect("metadata").len());

        let segment = Segment::open(dir.path(), 0, config).expect("reopen segment");
        assert_eq!(2, segment.next_offset());
        assert_eq!(b"first", &segment.read(0).expect("read record")[..]);
        assert_eq!(b"second", &segment.read(1).expect("read record")[..]);
        assert!(segment.read(2).unwrap_err().is_offset_not_found());
    }

    #[test]
    fn recover_unindexed_record() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config(1024, 1024);

        let segment = Segment::open(dir.path(), 0, config).expect("open segment");
        segment.append(RECORD).expect("append record");
        segment.close().expect("close segment");

        // a record that made it to the store, but not to the index
        let store = store_path(dir.path(), 0);
        let mut file = OpenOptions::new()
            .append(true)
            .open(&store)
            .expect("open store");
        file.write_all(&(RECORD.len() as u64).to_be_bytes())
            .expect("write length");
        file.write_all(&RECORD[..4]).expect("write partial record");
        drop(file);

        let segment = Segment::open(dir.path(), 0, config).expect("reopen segment");
        assert_eq!(1, segment.next_offset());
        assert_eq!(WIDTH, fs::metadata(&store).expect("metadata").len());

        assert_eq!(1, segment.append(b"next").expect("append after recovery"));
        assert_eq!(b"next", &segment.read(1).expect("read record")[..]);
    }

    #[test]
    fn remove_deletes_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let segment = Segment::open(dir.path(), 0, config(1024, 1024)).expect("open segment");
        segment.append(RECORD).expect("append record");

        segment.remove().expect("remove segment");

        assert!(!store_path(dir.path(), 0).exists());
        assert!(!index_path(dir.path(), 0).exists());
    }
}
