//! Offset index for the queue log.
//!
//! Log indices are dense, so the index is a vector of file offsets starting
//! at `base`. A checkpoint of the vector is written to a sidecar file on
//! close, letting a reopen skip re-scanning the part of the log it covers.

use crate::error::{EngineError, Result};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for index files.
const INDEX_MAGIC: &[u8; 4] = b"IDX\0";

/// Current index format version.
const INDEX_VERSION: u8 = 1;

struct Entries {
    base: i64,
    offsets: Vec<u64>,
}

/// Maps log index to the file offset of its record.
pub struct OffsetIndex {
    /// Path to the checkpoint file.
    path: PathBuf,

    entries: RwLock<Entries>,
}

/// Result of loading a checkpoint.
pub struct Checkpoint {
    pub index: OffsetIndex,
    /// Log size covered by the checkpoint; records past it must be scanned.
    pub covered_size: u64,
}

impl OffsetIndex {
    /// Create an empty index whose first record will get `base`.
    pub fn new(path: impl AsRef<Path>, base: i64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: RwLock::new(Entries {
                base,
                offsets: Vec::new(),
            }),
        }
    }

    /// Load a checkpoint if one exists.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Checkpoint>> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(None);
        }

        let mut reader = BufReader::new(File::open(&path)?);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(EngineError::InvalidFormat("Invalid index magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != INDEX_VERSION {
            return Err(EngineError::InvalidFormat(format!(
                "Unsupported index version: {}",
                version[0]
            )));
        }

        let base = read_i64(&mut reader)?;
        let covered_size = read_u64(&mut reader)?;
        let count = read_u64(&mut reader)? as usize;

        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(read_u64(&mut reader)?);
        }

        Ok(Some(Checkpoint {
            index: Self {
                path,
                entries: RwLock::new(Entries { base, offsets }),
            },
            covered_size,
        }))
    }

    /// Record the offset of the next index.
    pub fn push(&self, offset: u64) -> i64 {
        let mut entries = self.entries.write();
        let index = entries.base + entries.offsets.len() as i64;
        entries.offsets.push(offset);
        index
    }

    /// Offset of `index`, if it is inside the addressable range.
    pub fn offset_of(&self, index: i64) -> Option<u64> {
        let entries = self.entries.read();
        if index < entries.base {
            return None;
        }
        entries.offsets.get((index - entries.base) as usize).copied()
    }

    pub fn first_index(&self) -> i64 {
        self.entries.read().base
    }

    pub fn next_index(&self) -> i64 {
        let entries = self.entries.read();
        entries.base + entries.offsets.len() as i64
    }

    pub fn contains(&self, index: i64) -> bool {
        self.offset_of(index).is_some()
    }

    pub fn count(&self) -> usize {
        self.entries.read().offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Drop every entry; the next record gets `base`.
    pub fn reset(&self, base: i64) {
        let mut entries = self.entries.write();
        entries.base = base;
        entries.offsets.clear();
    }

    /// Write a checkpoint covering `covered_size` bytes of the log.
    pub fn save(&self, covered_size: u64) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);

        let entries = self.entries.read();
        writer.write_all(INDEX_MAGIC)?;
        writer.write_all(&[INDEX_VERSION])?;
        writer.write_all(&entries.base.to_le_bytes())?;
        writer.write_all(&covered_size.to_le_bytes())?;
        writer.write_all(&(entries.offsets.len() as u64).to_le_bytes())?;
        for offset in &entries.offsets {
            writer.write_all(&offset.to_le_bytes())?;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Remove the checkpoint file so a stale one is never trusted.
    pub fn invalidate(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_i64(reader: &mut impl Read) -> Result<i64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(i64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_push_and_lookup() {
        let dir = TempDir::new().unwrap();
        let index = OffsetIndex::new(dir.path().join("queue.idx"), 10);

        assert_eq!(index.push(13), 10);
        assert_eq!(index.push(40), 11);

        assert_eq!(index.offset_of(10), Some(13));
        assert_eq!(index.offset_of(11), Some(40));
        assert_eq!(index.offset_of(9), None);
        assert_eq!(index.offset_of(12), None);
        assert_eq!(index.first_index(), 10);
        assert_eq!(index.next_index(), 12);
    }

    #[test]
    fn test_reset_moves_base() {
        let dir = TempDir::new().unwrap();
        let index = OffsetIndex::new(dir.path().join("queue.idx"), 0);
        index.push(13);
        index.push(20);

        index.reset(2);
        assert!(index.is_empty());
        assert_eq!(index.first_index(), 2);
        assert_eq!(index.push(13), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.idx");

        {
            let index = OffsetIndex::new(&path, 5);
            index.push(13);
            index.push(50);
            index.save(90).unwrap();
        }

        let checkpoint = OffsetIndex::load(&path).unwrap().unwrap();
        assert_eq!(checkpoint.covered_size, 90);
        assert_eq!(checkpoint.index.first_index(), 5);
        assert_eq!(checkpoint.index.offset_of(6), Some(50));
        assert_eq!(checkpoint.index.next_index(), 7);
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(OffsetIndex::load(dir.path().join("missing.idx"))
            .unwrap()
            .is_none());
    }
}
