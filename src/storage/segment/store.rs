use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Read as _, Seek as _, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::Result;

/// Width of the big-endian length prefix written in front of each record
pub const LEN_WIDTH: u64 = 8;

/// Append-only file of length-prefixed records.
///
/// Each record is framed as `[u64 BE length][payload]`. Appends go through a buffered writer and
/// are flushed lazily, i.e., before any read and on [`Store::close`].
///
/// A failed append is rolled back so that the file ends exactly where the previous record ended.
/// If even that fails, the store refuses any further I/O.
#[derive(Debug)]
pub struct Store {
    /// file location
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    /// buffered writer over the file opened in append mode, `None` after a failed rollback
    writer: Option<BufWriter<StoreFile>>,
    /// current end of the store, including buffered but unflushed bytes
    size: u64,
}

impl StoreInner {
    fn writer(&mut self) -> io::Result<&mut BufWriter<StoreFile>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("store is unusable after a failed append"))
    }

    /// Flushes buffered records and returns the file for reading.
    fn flushed(&mut self) -> io::Result<&File> {
        let writer = self.writer()?;
        writer.flush()?;
        Ok(&writer.get_ref().file)
    }

    /// Drops everything written past `position`, including bytes still sitting in the buffer.
    fn rollback(&mut self, position: u64) -> io::Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };

        // file contents followed by the buffer always form a prefix of what was written
        let (mut file, buffered) = writer.into_parts();
        let buffered = buffered.unwrap_or_else(|e| e.into_inner());

        let on_disk = file.file.metadata()?.len();

        if on_disk < position {
            let missing = (position - on_disk) as usize;
            let Some(records) = buffered.get(..missing) else {
                return Err(io::Error::other(format!(
                    "{missing}B of earlier records are neither on disk nor buffered"
                )));
            };
            file.write_all(records)?;
        }

        file.file.set_len(position)?;

        self.writer = Some(BufWriter::new(file));
        self.size = position;

        Ok(())
    }
}

/// The store file, with an optional cap on how much more it may grow in tests.
#[derive(Debug)]
struct StoreFile {
    file: File,
    #[cfg(test)]
    quota: Option<Quota>,
}

/// Number of bytes that may still be written before writes start failing.
#[cfg(test)]
#[derive(Clone, Copy, Debug)]
pub(crate) enum Quota {
    /// fails a single write, then lifts itself
    Transient(u64),
    /// fails every write from then on
    Permanent(u64),
}

impl StoreFile {
    fn new(file: File) -> Self {
        Self {
            file,
            #[cfg(test)]
            quota: None,
        }
    }
}

impl Write for StoreFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        #[cfg(test)]
        if let Some(quota) = self.quota {
            let (Quota::Transient(left) | Quota::Permanent(left)) = quota;

            if left == 0 && !buf.is_empty() {
                if matches!(quota, Quota::Transient(_)) {
                    self.quota = None;
                }
                return Err(io::Error::other("file quota exceeded"));
            }

            let len = buf.len().min(usize::try_from(left).unwrap_or(usize::MAX));
            let n = self.file.write(&buf[..len])?;
            let left = left - n as u64;

            self.quota = Some(match quota {
                Quota::Transient(_) => Quota::Transient(left),
                Quota::Permanent(_) => Quota::Permanent(left),
            });

            return Ok(n);
        }

        self.file.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Store {
    /// Opens (or creates) the store file at `path` and resumes appending at its end.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // NOTE: append mode keeps writes at the end regardless of the cursor moved by reads
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path,
            inner: Mutex::new(StoreInner {
                writer: Some(BufWriter::new(StoreFile::new(file))),
                size,
            }),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total length of the store in bytes (buffered writes included)
    #[inline]
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Appends a record and returns `(bytes written, position of the record)`.
    ///
    /// Either the whole frame is appended or, on error, none of it is.
    pub fn append(&self, payload: &[u8]) -> Result<(u64, u64)> {
        let mut inner = self.inner.lock();

        let position = inner.size;

        let writer = inner.writer()?;
        let appended = writer
            .write_all(&(payload.len() as u64).to_be_bytes())
            .and_then(|()| writer.write_all(payload));

        if let Err(e) = appended {
            match inner.rollback(position) {
                Ok(()) => warn!(path = %self.path.display(), position, "rolled back failed append: {e}"),
                Err(rollback) => error!(
                    path = %self.path.display(),
                    position,
                    "failed to roll back append ({e}), closing store for writes: {rollback}"
                ),
            }
            return Err(e.into());
        }

        let written = LEN_WIDTH + payload.len() as u64;
        inner.size += written;

        Ok((written, position))
    }

    /// Reads the record starting at byte `position`.
    pub fn read(&self, position: u64) -> Result<Bytes> {
        let mut inner = self.inner.lock();

        let size = inner.size;
        let file = inner.flushed()?;

        ensure_within(position, LEN_WIDTH, size)?;

        let mut len = [0; LEN_WIDTH as usize];
        read_exact_at(file, &mut len, position)?;
        let len = u64::from_be_bytes(len);

        ensure_within(position + LEN_WIDTH, len, size)?;

        let mut payload = vec![0; len as usize];
        read_exact_at(file, &mut payload, position + LEN_WIDTH)?;

        Ok(Bytes::from(payload))
    }

    /// Reads raw store bytes starting at `offset` into `buf`, returning the number of bytes read.
    ///
    /// Reads less than `buf.len()` bytes only when the end of the store is reached.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut inner = self.inner.lock();

        let mut file = inner.flushed()?;
        file.seek(SeekFrom::Start(offset))?;

        let mut n = 0;
        while n < buf.len() {
            match file.read(&mut buf[n..]) {
                Ok(0) => break,
                Ok(k) => n += k,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(n)
    }

    /// Cuts the store down to `size` bytes, discarding any records past it.
    pub(crate) fn truncate(&self, size: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.flushed()?.set_len(size)?;
        inner.size = size;
        Ok(())
    }

    /// Flushes buffered records, syncs the file and closes it.
    pub fn close(self) -> Result<()> {
        let mut inner = self.inner.into_inner();
        let writer = inner.writer.take().ok_or_else(|| {
            io::Error::other(format!("store {} was closed for writes", self.path.display()))
        })?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.file.sync_all()?;
        Ok(())
    }

    /// Limits how many more bytes may reach the file, `None` lifts the limit.
    #[cfg(test)]
    pub(crate) fn set_quota(&self, quota: Option<Quota>) {
        if let Some(writer) = self.inner.lock().writer.as_mut() {
            writer.get_mut().quota = quota;
        }
    }
}

fn ensure_within(start: u64, len: u64, size: u64) -> io::Result<()> {
    match start.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("read of {len}B at {start} is past the end of the store ({size}B)"),
        )),
    }
}

fn read_exact_at(mut file: &File, buf: &mut [u8], position: u64) -> io::Result<()> {
    file.seek(SeekFrom::Start(position))?;
    file.read_exact(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogError;

    const RECORD: &[u8] = b"hello world";
    const WIDTH: u64 = LEN_WIDTH + RECORD.len() as u64;

    #[test]
    fn append_read() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::open(dir.path().join("0.store")).expect("open store");

        for i in 0..3 {
            let (n, pos) = store.append(RECORD).expect("append record");
            assert_eq!(WIDTH, n);
            assert_eq!(i * WIDTH, pos);
        }

        for i in 0..3 {
            let record = store.read(i * WIDTH).expect("read record");
            assert_eq!(RECORD, &record[..]);
        }

        assert_eq!(3 * WIDTH, store.size());
    }

    #[test]
    fn read_at_raw_bytes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::open(dir.path().join("0.store")).expect("open store");

        store.append(RECORD).expect("append record");
        store.append(b"second").expect("append record");

        let mut len = [0; LEN_WIDTH as usize];
        let n = store.read_at(&mut len, 0).expect("read length");
        assert_eq!(LEN_WIDTH as usize, n);
        assert_eq!(RECORD.len() as u64, u64::from_be_bytes(len));

        let mut payload = vec![0; RECORD.len()];
        store.read_at(&mut payload, LEN_WIDTH).expect("read payload");
        assert_eq!(RECORD, &payload[..]);

        let mut tail = [0; 64];
        let n = store.read_at(&mut tail, WIDTH).expect("read tail");
        assert_eq!(LEN_WIDTH as usize + 6, n, "short read at the end of the store");
        assert_eq!(b"second", &tail[LEN_WIDTH as usize..n]);
    }

    #[test]
    fn read_out_of_bounds() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::open(dir.path().join("0.store")).expect("open store");

        store.append(RECORD).expect("append record");

        let err = store.read(WIDTH).expect_err("no record at the end of the store");
        assert!(matches!(err, LogError::Io(e) if e.kind() == ErrorKind::UnexpectedEof));

        store
            .read(u64::MAX - 2)
            .expect_err("position overflowing the frame bounds");
    }

    #[test]
    fn close_flushes_and_reopen_resumes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("0.store");

        let store = Store::open(&path).expect("open store");
        store.append(RECORD).expect("append record");
        store.close().expect("close store");

        assert_eq!(WIDTH, std::fs::metadata(&path).expect("metadata").len());

        let store = Store::open(&path).expect("reopen store");
        assert_eq!(WIDTH, store.size());

        let (_, pos) = store.append(RECORD).expect("append after reopen");
        assert_eq!(WIDTH, pos);
        assert_eq!(RECORD, &store.read(pos).expect("read record")[..]);
    }

    #[test]
    fn truncate_drops_tail() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::open(dir.path().join("0.store")).expect("open store");

        store.append(RECORD).expect("append record");
        store.append(RECORD).expect("append record");

        store.truncate(WIDTH).expect("truncate store");
        assert_eq!(WIDTH, store.size());
        store.read(WIDTH).expect_err("truncated record");

        let (_, pos) = store.append(b"next").expect("append after truncate");
        assert_eq!(WIDTH, pos);
        assert_eq!(b"next", &store.read(pos).expect("read record")[..]);
    }

    #[test]
    fn failed_append_is_rolled_back() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("0.store");
        let store = Store::open(&path).expect("open store");

        store.append(RECORD).expect("append record");

        // the length prefix and part of a large payload reach the file before it fills up
        store.set_quota(Some(Quota::Transient(WIDTH + 100)));
        let large = vec![7; 20_000];
        let err = store.append(&large).expect_err("file quota exceeded");
        assert!(matches!(err, LogError::Io(_)));

        assert_eq!(WIDTH, store.size());
        assert_eq!(WIDTH, std::fs::metadata(&path).expect("metadata").len());

        let (_, pos) = store.append(b"third").expect("append after failure");
        assert_eq!(WIDTH, pos);
        assert_eq!(RECORD, &store.read(0).expect("read first record")[..]);
        assert_eq!(b"third", &store.read(pos).expect("read third record")[..]);

        store.close().expect("close store");
        assert_eq!(WIDTH + LEN_WIDTH + 5, std::fs::metadata(&path).expect("metadata").len());
    }

    #[test]
    fn failed_append_keeps_buffered_records() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::open(dir.path().join("0.store")).expect("open store");

        // first record only sits in the write buffer
        store.append(RECORD).expect("append record");

        // only part of the buffered record reaches the file before the write fails
        store.set_quota(Some(Quota::Transient(10)));
        store.append(&[1; 16 * 1024]).expect_err("file quota exceeded");

        assert_eq!(WIDTH, store.size());
        assert_eq!(RECORD, &store.read(0).expect("read first record")[..]);

        let (_, pos) = store.append(b"next").expect("append after failure");
        assert_eq!(WIDTH, pos);
        assert_eq!(b"next", &store.read(pos).expect("read record")[..]);
    }

    #[test]
    fn failed_rollback_refuses_writes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::open(dir.path().join("0.store")).expect("open store");

        store.append(RECORD).expect("append record");

        // not even the buffered record can be written out
        store.set_quota(Some(Quota::Permanent(0)));
        store.append(&[1; 16 * 1024]).expect_err("file quota exceeded");

        let err = store.append(b"next").expect_err("store closed for writes");
        assert!(matches!(err, LogError::Io(_)));
        store.read(0).expect_err("store closed for reads");
        store.close().expect_err("close failed store");
    }
}
