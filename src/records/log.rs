//! Append-only queue log.

use super::index::OffsetIndex;
use crate::error::{EngineError, Result};
use crate::types::RawExcerpt;
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Magic bytes for the log header.
const LOG_MAGIC: &[u8; 4] = b"CEQ\0";

/// Magic bytes for each record.
const RECORD_MAGIC: &[u8; 4] = b"EXC\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Header size: magic + version + base index.
const HEADER_SIZE: u64 = 4 + 1 + 8;

/// Largest topic or message accepted when scanning.
const MAX_FIELD_SIZE: usize = 64 * 1024 * 1024;

pub const LOG_FILE: &str = "queue.log";
pub const INDEX_FILE: &str = "queue.idx";
pub const LOCK_FILE: &str = "LOCK";

struct LogFile {
    file: File,
    /// Current file size (for appending).
    size: u64,
    /// Number of writes since last sync.
    writes_since_sync: u64,
}

/// Durable, append-only sequence of indexed records.
///
/// Indices are dense and strictly increasing per store, including across
/// reopen and [`clear`](LogStore::clear). Appends and reads may run
/// concurrently; a record becomes visible to readers once its append returns.
pub struct LogStore {
    dir: PathBuf,
    inner: Mutex<LogFile>,
    index: OffsetIndex,
    cache: Mutex<LruCache<i64, RawExcerpt>>,
    /// Sync every N writes.
    sync_interval: u64,
    closed: AtomicBool,
    /// Held for the life of the store.
    _lock_file: File,
}

impl LogStore {
    /// Default sync interval - sync every 100 writes.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 100;

    /// Default number of records kept in the read cache.
    pub const DEFAULT_CACHE_SIZE: usize = 1024;

    /// Open or create a log in `dir` with default settings.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(dir, Self::DEFAULT_SYNC_INTERVAL, Self::DEFAULT_CACHE_SIZE)
    }

    /// Open or create a log in `dir`.
    /// - sync_interval = 0 or 1: sync every write
    /// - sync_interval = 100: sync every 100 writes
    pub fn open_with(dir: impl AsRef<Path>, sync_interval: u64, cache_size: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock_file = Self::acquire_lock(&dir)?;

        let path = dir.join(LOG_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut size = file.metadata()?.len();
        let base = if size < HEADER_SIZE {
            Self::write_header(&mut file, 0)?;
            size = HEADER_SIZE;
            0
        } else {
            Self::read_header(&mut file)?
        };

        let index_path = dir.join(INDEX_FILE);
        let (index, scan_from) = match OffsetIndex::load(&index_path) {
            Ok(Some(checkpoint))
                if checkpoint.index.first_index() == base && checkpoint.covered_size <= size =>
            {
                let covered = checkpoint.covered_size.max(HEADER_SIZE);
                (checkpoint.index, covered)
            }
            Ok(_) => (OffsetIndex::new(&index_path, base), HEADER_SIZE),
            Err(e) => {
                warn!(path = %index_path.display(), error = %e, "discarding unreadable index checkpoint");
                (OffsetIndex::new(&index_path, base), HEADER_SIZE)
            }
        };

        let good_end = Self::scan(&file, scan_from, size, &index)?;
        if good_end < size {
            warn!(
                path = %path.display(),
                valid = good_end,
                size,
                "truncating incomplete record at end of log"
            );
            file.set_len(good_end)?;
            size = good_end;
        }

        // The checkpoint is only valid for a cleanly closed log.
        index.invalidate()?;

        debug!(path = %path.display(), first = index.first_index(), next = index.next_index(), "opened log");

        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            dir,
            inner: Mutex::new(LogFile {
                file,
                size,
                writes_since_sync: 0,
            }),
            index,
            cache: Mutex::new(LruCache::new(cache_size)),
            sync_interval: if sync_interval == 0 { 1 } else { sync_interval },
            closed: AtomicBool::new(false),
            _lock_file: lock_file,
        })
    }

    /// Append a record, returning its index.
    pub fn append(&self, topic: &[u8], message: &[u8]) -> Result<i64> {
        let mut inner = self.inner.lock();
        self.ensure_open()?;

        let index = self.index.next_index();
        self.write_locked(&mut inner, index, topic, message)?;
        Ok(index)
    }

    /// Append a record received from a replication source, keeping its index.
    ///
    /// Returns `false` for a record this log already holds. A record beyond
    /// the tail is only accepted into an empty log, which then starts at it.
    pub fn append_replicated(&self, excerpt: &RawExcerpt) -> Result<bool> {
        let mut inner = self.inner.lock();
        self.ensure_open()?;

        let next = self.index.next_index();
        if excerpt.index < next {
            return Ok(false);
        }
        if excerpt.index > next {
            if !self.index.is_empty() {
                return Err(EngineError::ReplicationGap {
                    expected: next,
                    got: excerpt.index,
                });
            }
            self.rebase_locked(&mut inner, excerpt.index)?;
        }

        self.write_locked(&mut inner, excerpt.index, &excerpt.topic, &excerpt.message)?;
        Ok(true)
    }

    /// Read the record at `index`, or `None` if it is not in the log.
    pub fn read_at(&self, index: i64) -> Result<Option<RawExcerpt>> {
        let offset = match self.index.offset_of(index) {
            Some(offset) => offset,
            None => return Ok(None),
        };

        if let Some(cached) = self.cache.lock().get(&index) {
            return Ok(Some(cached.clone()));
        }

        let excerpt = {
            let mut inner = self.inner.lock();
            // A clear may have raced the lookup.
            if self.index.offset_of(index) != Some(offset) {
                return Ok(None);
            }
            inner.file.seek(SeekFrom::Start(offset))?;
            Self::read_record(&mut inner.file)?
        };

        if excerpt.index != index {
            return Err(EngineError::Corruption(format!(
                "record at offset {} has index {}, expected {}",
                offset, excerpt.index, index
            )));
        }

        self.cache.lock().put(index, excerpt.clone());
        Ok(Some(excerpt))
    }

    /// First index still held by the log.
    pub fn first_index(&self) -> i64 {
        self.index.first_index()
    }

    /// Index the next append will receive.
    pub fn next_index_to_append(&self) -> i64 {
        self.index.next_index()
    }

    pub fn contains(&self, index: i64) -> bool {
        self.index.contains(index)
    }

    pub fn len(&self) -> usize {
        self.index.count()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Truncate the log. Indexing resumes from the pre-clear tail.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_open()?;

        let base = self.index.next_index();
        self.rebase_locked(&mut inner, base)?;
        debug!(dir = %self.dir.display(), base, "cleared log");
        Ok(())
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.sync_all()?;
        inner.writes_since_sync = 0;
        Ok(())
    }

    /// Sync and checkpoint the index. Further writes fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        inner.file.sync_all()?;
        inner.writes_since_sync = 0;
        self.index.save(inner.size)?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Directory holding the log files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Human-readable listing of every record, for debugging.
    pub fn dump(&self) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "# dir={} first={} next={}",
            self.dir.display(),
            self.first_index(),
            self.next_index_to_append()
        );
        for index in self.first_index()..self.next_index_to_append() {
            if let Some(excerpt) = self.read_at(index)? {
                let _ = writeln!(
                    out,
                    "{} topic={} message={}",
                    excerpt.index,
                    String::from_utf8_lossy(&excerpt.topic),
                    String::from_utf8_lossy(&excerpt.message)
                );
            }
        }
        Ok(out)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::Closed(self.dir.display().to_string()));
        }
        Ok(())
    }

    fn write_locked(&self, inner: &mut LogFile, index: i64, topic: &[u8], message: &[u8]) -> Result<()> {
        let frame = Self::encode_record(index, topic, message);

        let offset = inner.size;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&frame)?;
        inner.size += frame.len() as u64;

        let assigned = self.index.push(offset);
        debug_assert_eq!(assigned, index);

        inner.writes_since_sync += 1;
        if inner.writes_since_sync >= self.sync_interval {
            inner.file.sync_all()?;
            inner.writes_since_sync = 0;
        }
        Ok(())
    }

    fn rebase_locked(&self, inner: &mut LogFile, base: i64) -> Result<()> {
        inner.file.set_len(0)?;
        Self::write_header(&mut inner.file, base)?;
        inner.size = HEADER_SIZE;
        inner.writes_since_sync = 0;
        self.index.reset(base);
        self.cache.lock().clear();
        Ok(())
    }

    fn write_header(file: &mut File, base: i64) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(LOG_MAGIC)?;
        file.write_all(&[LOG_VERSION])?;
        file.write_all(&base.to_le_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn read_header(file: &mut File) -> Result<i64> {
        file.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(EngineError::InvalidFormat("Invalid log magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(EngineError::InvalidFormat(format!(
                "Unsupported log version: {}",
                version[0]
            )));
        }

        let mut base = [0u8; 8];
        file.read_exact(&mut base)?;
        Ok(i64::from_le_bytes(base))
    }

    /// Index every complete record in `[from, size)`; returns the end of the
    /// last good record.
    fn scan(file: &File, from: u64, size: u64, index: &OffsetIndex) -> Result<u64> {
        let mut file = file.try_clone()?;
        file.seek(SeekFrom::Start(from))?;
        let mut reader = BufReader::new(file);

        let mut offset = from;
        while offset < size {
            let record = match Self::read_record(&mut reader) {
                Ok(record) => record,
                Err(EngineError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(EngineError::InvalidFormat(_)) | Err(EngineError::ChecksumMismatch { .. }) => {
                    break
                }
                Err(e) => return Err(e),
            };

            let expected = index.next_index();
            if record.index != expected {
                return Err(EngineError::Corruption(format!(
                    "record at offset {} has index {}, expected {}",
                    offset, record.index, expected
                )));
            }

            index.push(offset);
            offset += Self::frame_len(&record) as u64;
        }
        Ok(offset.min(size))
    }

    fn frame_len(record: &RawExcerpt) -> usize {
        4 + 1 + 1 + 8 + 4 + record.topic.len() + 4 + record.message.len() + 4
    }

    fn checksum(index: i64, topic: &[u8], message: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&index.to_le_bytes());
        hasher.update(topic);
        hasher.update(message);
        hasher.finalize()
    }

    fn encode_record(index: i64, topic: &[u8], message: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(26 + topic.len() + message.len());

        // Magic, version, flags (reserved)
        frame.extend_from_slice(RECORD_MAGIC);
        frame.push(LOG_VERSION);
        frame.push(0u8);

        frame.extend_from_slice(&index.to_le_bytes());

        frame.extend_from_slice(&(topic.len() as u32).to_le_bytes());
        frame.extend_from_slice(topic);

        frame.extend_from_slice(&(message.len() as u32).to_le_bytes());
        frame.extend_from_slice(message);

        frame.extend_from_slice(&Self::checksum(index, topic, message).to_le_bytes());
        frame
    }

    fn read_record(reader: &mut impl Read) -> Result<RawExcerpt> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != RECORD_MAGIC {
            return Err(EngineError::InvalidFormat("Invalid record magic".into()));
        }

        let mut version_flags = [0u8; 2];
        reader.read_exact(&mut version_flags)?;
        if version_flags[0] != LOG_VERSION {
            return Err(EngineError::InvalidFormat(format!(
                "Unsupported record version: {}",
                version_flags[0]
            )));
        }

        let mut index_bytes = [0u8; 8];
        reader.read_exact(&mut index_bytes)?;
        let index = i64::from_le_bytes(index_bytes);

        let topic = Self::read_field(reader)?;
        let message = Self::read_field(reader)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = Self::checksum(index, &topic, &message);
        if stored != computed {
            return Err(EngineError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        Ok(RawExcerpt {
            index,
            topic,
            message,
        })
    }

    fn read_field(reader: &mut impl Read) -> Result<Vec<u8>> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FIELD_SIZE {
            return Err(EngineError::InvalidFormat(format!("field too large: {}", len)));
        }
        let mut bytes = vec![0u8; len];
        reader.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn acquire_lock(dir: &Path) -> Result<File> {
        let lock_file = File::create(dir.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| EngineError::Locked)?;
        Ok(lock_file)
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        // Best-effort checkpoint on drop
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let log = LogStore::open(dir.path()).unwrap();

        let index = log.append(b"topic", b"hello").unwrap();
        assert_eq!(index, 0);

        let excerpt = log.read_at(index).unwrap().unwrap();
        assert_eq!(excerpt.topic, b"topic");
        assert_eq!(excerpt.message, b"hello");
        assert_eq!(excerpt.index, 0);
    }

    #[test]
    fn test_read_past_tail_is_absent() {
        let dir = TempDir::new().unwrap();
        let log = LogStore::open(dir.path()).unwrap();
        log.append(b"t", b"m").unwrap();

        assert!(log.read_at(1).unwrap().is_none());
        assert!(log.read_at(-1).unwrap().is_none());
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();

        {
            let log = LogStore::open(dir.path()).unwrap();
            for i in 0..5 {
                log.append(b"t", format!("record {}", i).as_bytes()).unwrap();
            }
            log.close().unwrap();
        }

        let log = LogStore::open(dir.path()).unwrap();
        assert_eq!(log.len(), 5);
        assert_eq!(log.append(b"t", b"record 5").unwrap(), 5);
        assert_eq!(log.read_at(3).unwrap().unwrap().message, b"record 3");
    }

    #[test]
    fn test_reopen_without_checkpoint_rescans() {
        let dir = TempDir::new().unwrap();

        {
            let log = LogStore::open(dir.path()).unwrap();
            log.append(b"t", b"a").unwrap();
            log.append(b"t", b"b").unwrap();
            log.close().unwrap();
        }
        std::fs::remove_file(dir.path().join(INDEX_FILE)).unwrap();

        let log = LogStore::open(dir.path()).unwrap();
        assert_eq!(log.next_index_to_append(), 2);
        assert_eq!(log.read_at(1).unwrap().unwrap().message, b"b");
    }

    #[test]
    fn test_torn_record_is_truncated() {
        let dir = TempDir::new().unwrap();

        {
            let log = LogStore::open(dir.path()).unwrap();
            log.append(b"t", b"complete").unwrap();
        }
        // Simulate a crash mid-append.
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join(LOG_FILE))
                .unwrap();
            file.write_all(b"EXC\0\x01\x00\x01").unwrap();
        }
        std::fs::remove_file(dir.path().join(INDEX_FILE)).unwrap();

        let log = LogStore::open(dir.path()).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.append(b"t", b"next").unwrap(), 1);
        assert_eq!(log.read_at(1).unwrap().unwrap().message, b"next");
    }

    #[test]
    fn test_clear_keeps_indices_monotonic() {
        let dir = TempDir::new().unwrap();

        {
            let log = LogStore::open(dir.path()).unwrap();
            log.append(b"t", b"a").unwrap();
            log.append(b"t", b"b").unwrap();
            log.clear().unwrap();

            assert!(log.is_empty());
            assert!(log.read_at(0).unwrap().is_none());
            assert_eq!(log.first_index(), 2);
            assert_eq!(log.append(b"t", b"c").unwrap(), 2);
        }

        let log = LogStore::open(dir.path()).unwrap();
        assert_eq!(log.first_index(), 2);
        assert_eq!(log.append(b"t", b"d").unwrap(), 3);
    }

    #[test]
    fn test_second_owner_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let _log = LogStore::open(dir.path()).unwrap();

        assert!(matches!(LogStore::open(dir.path()), Err(EngineError::Locked)));
    }

    #[test]
    fn test_closed_log_rejects_appends() {
        let dir = TempDir::new().unwrap();
        let log = LogStore::open(dir.path()).unwrap();
        log.close().unwrap();

        assert!(matches!(log.append(b"t", b"m"), Err(EngineError::Closed(_))));
    }

    #[test]
    fn test_append_replicated() {
        let dir = TempDir::new().unwrap();
        let log = LogStore::open(dir.path()).unwrap();

        let at = |index| RawExcerpt {
            index,
            topic: b"t".to_vec(),
            message: format!("m{}", index).into_bytes(),
        };

        // An empty sink starts wherever the source is.
        assert!(log.append_replicated(&at(7)).unwrap());
        assert_eq!(log.first_index(), 7);
        assert!(log.append_replicated(&at(8)).unwrap());

        // Re-delivery is dropped.
        assert!(!log.append_replicated(&at(8)).unwrap());

        assert!(matches!(
            log.append_replicated(&at(10)),
            Err(EngineError::ReplicationGap { expected: 9, got: 10 })
        ));
        assert_eq!(log.read_at(8).unwrap().unwrap().message, b"m8");
    }

    #[test]
    fn test_dump_lists_records() {
        let dir = TempDir::new().unwrap();
        let log = LogStore::open(dir.path()).unwrap();
        log.append(b"prices", b"42").unwrap();

        let dump = log.dump().unwrap();
        assert!(dump.contains("0 topic=prices message=42"));
    }
}
