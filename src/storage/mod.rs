use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{error, info, warn};

use crate::error::{LogError, Result};

pub use self::config::{Config, SegmentConfig};
pub use self::segment::Segment;

pub mod config;
pub mod segment;

/// Durable, append-only log made of size-bounded segments.
///
/// Segments cover contiguous, non-overlapping offset ranges. Only the last (active) segment is
/// writable: once it fills up, it's rolled over to a new segment starting at its next offset.
///
/// The log directory must be owned exclusively by a single [`Log`] instance.
#[derive(Debug)]
pub struct Log {
    /// directory holding the segment files
    dir: PathBuf,
    config: Config,
    /// segments sorted by their base offsets (asc), empty only once the log is closed
    segments: RwLock<Vec<Segment>>,
}

impl Log {
    /// Opens the log in `dir`, re-creating segments from the files found there.
    ///
    /// A new log starts with an empty segment at the configured initial offset.
    pub fn open(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let segments = load_segments(&dir, config.segment)?;

        info!(
            dir = %dir.display(),
            segments = segments.len(),
            "opened log"
        );

        Ok(Self {
            dir,
            config,
            segments: RwLock::new(segments),
        })
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Appends a record to the active segment and returns its offset.
    ///
    /// The active segment is rolled over only after the append that filled it up.
    pub fn append(&self, payload: &[u8]) -> Result<u64> {
        loop {
            let appended = {
                let segments = self.segments.read();
                let active = segments.last().ok_or(LogError::Closed)?;
                let base_offset = active.base_offset();

                // NOTE: the active segment can only be maxed here if its roll-over failed before
                if active.is_maxed() {
                    Err(base_offset)
                } else {
                    match active.append(payload) {
                        Ok(offset) => Ok((offset, base_offset, active.is_maxed())),
                        Err(LogError::CapacityExceeded) => Err(base_offset),
                        Err(e) => return Err(e),
                    }
                }
            };

            match appended {
                Ok((offset, base_offset, maxed)) => {
                    if maxed {
                        // the record is durable, the next append will retry the roll-over
                        if let Err(e) = self.roll(base_offset) {
                            error!(offset, base_offset, "failed to roll active segment: {e}");
                        }
                    }
                    return Ok(offset);
                }

                Err(base_offset) => self.roll(base_offset)?,
            }
        }
    }

    /// Reads the record at given `offset`.
    pub fn read(&self, offset: u64) -> Result<Bytes> {
        let segments = self.segments.read();

        if segments.is_empty() {
            return Err(LogError::Closed);
        }

        lookup_segment(&segments, offset)
            .ok_or(LogError::OffsetNotFound(offset))?
            .read(offset)
    }

    /// Reads the latest record in the log together with its offset.
    pub fn read_last(&self) -> Result<Option<(u64, Bytes)>> {
        let segments = self.segments.read();

        if segments.is_empty() {
            return Err(LogError::Closed);
        }

        for segment in segments.iter().rev() {
            if let Some(last) = segment.read_last()? {
                return Ok(Some(last));
            }
        }

        Ok(None)
    }

    /// Base offset of the oldest segment
    pub fn lowest_offset(&self) -> Result<u64> {
        self.segments
            .read()
            .first()
            .map(Segment::base_offset)
            .ok_or(LogError::Closed)
    }

    /// Offset of the latest record or `None` if the log holds no records
    pub fn highest_offset(&self) -> Result<Option<u64>> {
        let segments = self.segments.read();

        let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
            return Err(LogError::Closed);
        };

        let next_offset = last.next_offset();

        Ok((next_offset > first.base_offset()).then(|| next_offset - 1))
    }

    /// Removes all segments whose records all have offsets below `lowest`.
    ///
    /// The active segment is never removed. Returns the number of removed segments.
    pub fn truncate(&self, lowest: u64) -> Result<usize> {
        let removed = {
            let mut segments = self.segments.write();

            let Some(active) = segments.len().checked_sub(1) else {
                return Err(LogError::Closed);
            };

            let n = segments[..active]
                .iter()
                .take_while(|segment| segment.next_offset() <= lowest)
                .count();

            segments.drain(..n).collect::<Vec<_>>()
        };

        let n = removed.len();
        let mut result = Ok(n);

        for segment in removed {
            let base_offset = segment.base_offset();
            if let Err(e) = segment.remove() {
                warn!(base_offset, "failed to remove segment: {e}");
                result = result.and(Err(e));
            }
        }

        info!(lowest, removed = n, "truncated log");

        result
    }

    /// Returns a reader over the raw store contents of all segments (in offset order).
    ///
    /// The reader holds the segment list, so segments cannot be rolled, truncated or closed
    /// while it's alive.
    pub fn reader(&self) -> LogReader<'_> {
        LogReader {
            segments: self.segments.read(),
            segment: 0,
            position: 0,
        }
    }

    /// Closes all segments.
    ///
    /// Closing is attempted for every segment, the first error is reported. Any subsequent
    /// operation on the log fails with [`LogError::Closed`].
    pub fn close(&self) -> Result<()> {
        let segments = mem::take(&mut *self.segments.write());
        close_segments(segments)?;
        info!(dir = %self.dir.display(), "closed log");
        Ok(())
    }

    /// Closes the log and deletes its directory.
    pub fn remove(&self) -> Result<()> {
        self.close()?;
        fs::remove_dir_all(&self.dir)?;
        info!(dir = %self.dir.display(), "removed log");
        Ok(())
    }

    /// Deletes all records and starts over with a single empty segment.
    pub fn reset(&self) -> Result<()> {
        let mut segments = self.segments.write();

        close_segments(mem::take(&mut *segments))?;

        fs::remove_dir_all(&self.dir)?;
        fs::create_dir_all(&self.dir)?;

        *segments = load_segments(&self.dir, self.config.segment)?;

        info!(dir = %self.dir.display(), "reset log");

        Ok(())
    }

    /// Rolls the active segment over if it still is the segment with `base_offset` and is maxed.
    fn roll(&self, base_offset: u64) -> Result<()> {
        let mut segments = self.segments.write();

        let Some(active) = segments.last() else {
            return Err(LogError::Closed);
        };

        // someone else has already rolled this segment
        if active.base_offset() != base_offset || !active.is_maxed() {
            return Ok(());
        }

        // a maxed segment without records would be replaced by a segment with the same base
        if active.is_empty() {
            return Err(LogError::CapacityExceeded);
        }

        let next_offset = active.next_offset();
        let segment = Segment::open(&self.dir, next_offset, self.config.segment)?;

        info!(base_offset = next_offset, "rolled new active segment");

        segments.push(segment);

        Ok(())
    }
}

/// Finds the segment holding `offset` by a binary search over the base offsets.
fn lookup_segment(segments: &[Segment], offset: u64) -> Option<&Segment> {
    let ix = segments
        .partition_point(|segment| segment.base_offset() <= offset)
        .checked_sub(1)?;

    segments.get(ix).filter(|segment| segment.contains(offset))
}

fn load_segments(dir: &Path, config: SegmentConfig) -> Result<Vec<Segment>> {
    let mut base_offsets = BTreeSet::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        let ext = path.extension().and_then(|ext| ext.to_str());
        if !matches!(ext, Some(segment::STORE_EXT | segment::INDEX_EXT)) {
            continue;
        }

        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            return Err(LogError::corrupt(&path, "invalid segment file name"));
        };

        let base_offset = stem.parse::<u64>().map_err(|_| {
            LogError::corrupt(&path, format!("'{stem}' does not encode a valid base offset"))
        })?;

        base_offsets.insert(base_offset);
    }

    if base_offsets.is_empty() {
        base_offsets.insert(config.initial_offset);
    }

    let mut segments = Vec::with_capacity(base_offsets.len());

    for base_offset in base_offsets {
        let segment = Segment::open(dir, base_offset, config)?;

        if let Some(prev) = segments.last().map(Segment::next_offset) {
            if prev != base_offset {
                warn!(
                    base_offset,
                    expected = prev,
                    "segment does not follow its predecessor"
                );
            }
        }

        segments.push(segment);
    }

    Ok(segments)
}

fn close_segments(segments: Vec<Segment>) -> Result<()> {
    close_each(segments, |segment| {
        let base_offset = segment.base_offset();
        segment
            .close()
            .inspect_err(|e| warn!(base_offset, "failed to close segment: {e}"))
    })
}

/// Runs `close` on every item even if some fail, and reports the first failure.
fn close_each<T, E>(
    items: impl IntoIterator<Item = T>,
    mut close: impl FnMut(T) -> Result<(), E>,
) -> Result<(), E> {
    let mut result = Ok(());

    for item in items {
        if let Err(e) = close(item) {
            result = result.and(Err(e));
        }
    }

    result
}

/// Reader over the raw store bytes of all segments of a [`Log`], see [`Log::reader`].
pub struct LogReader<'a> {
    segments: RwLockReadGuard<'a, Vec<Segment>>,
    /// index of the current segment
    segment: usize,
    /// position within the current segment's store
    position: u64,
}

impl io::Read for LogReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while let Some(segment) = self.segments.get(self.segment) {
            let n = segment.read_at(buf, self.position)?;

            if n > 0 {
                self.position += n as u64;
                return Ok(n);
            }

            self.segment += 1;
            self.position = 0;
        }

        Ok(0)
    }
}
