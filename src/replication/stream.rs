//! Moving records between a source log and a replica.

use crate::config::MessageAdaptor;
use crate::error::Result;
use crate::records::{LogStore, Tailer};
use crate::types::RawExcerpt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Reads batches of records from a source log, starting at a requested index.
pub struct ReplicationStream {
    tailer: Tailer,
}

impl ReplicationStream {
    /// Start at `from`. An index below the first held record starts at the
    /// first record; one at or past the tail waits for new appends.
    pub fn from_index(log: Arc<LogStore>, from: i64) -> Self {
        let first = log.first_index();
        let next = log.next_index_to_append();
        let mut tailer = Tailer::new(Arc::clone(&log));
        if from <= first {
            tailer.to_start();
        } else if from >= next {
            tailer.to_end();
        } else {
            tailer.move_to_index(from);
        }
        debug!(from, start = tailer.position(), "replication stream opened");
        Self { tailer }
    }

    /// Up to `max` records that have not been streamed yet.
    pub fn next_batch(&mut self, max: usize) -> Result<Vec<RawExcerpt>> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.tailer.read_next()? {
                Some(excerpt) => batch.push(excerpt),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Index of the next record the stream will send.
    pub fn position(&self) -> i64 {
        self.tailer.position()
    }
}

/// Applies replicated records to a local replica, keeping source indices.
pub struct ReplicationSink {
    log: Arc<LogStore>,
    adaptor: Option<Arc<dyn MessageAdaptor>>,
}

impl ReplicationSink {
    pub fn new(log: Arc<LogStore>, adaptor: Option<Arc<dyn MessageAdaptor>>) -> Self {
        Self { log, adaptor }
    }

    /// Apply one record. Returns `false` for a duplicate.
    pub fn apply(&self, excerpt: &RawExcerpt) -> Result<bool> {
        let applied = match &self.adaptor {
            Some(adaptor) => {
                let adapted = RawExcerpt {
                    index: excerpt.index,
                    topic: excerpt.topic.clone(),
                    message: adaptor.adapt(&excerpt.message),
                };
                self.log.append_replicated(&adapted)?
            }
            None => self.log.append_replicated(excerpt)?,
        };
        if !applied {
            trace!(index = excerpt.index, "skipped duplicate replicated record");
        }
        Ok(applied)
    }

    /// Apply a batch in order, stopping at the first error. Returns how many
    /// records were new.
    pub fn apply_batch(&self, batch: &[RawExcerpt]) -> Result<usize> {
        let mut applied = 0;
        for excerpt in batch {
            if self.apply(excerpt)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Index the replica expects next.
    pub fn next_index(&self) -> i64 {
        self.log.next_index_to_append()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use tempfile::TempDir;

    struct Upper;

    impl MessageAdaptor for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn adapt(&self, message: &[u8]) -> Vec<u8> {
            message.to_ascii_uppercase()
        }
    }

    fn source_with(dir: &TempDir, n: usize) -> Arc<LogStore> {
        let log = Arc::new(LogStore::open(dir.path()).unwrap());
        for i in 0..n {
            log.append(b"t", format!("m{}", i).as_bytes()).unwrap();
        }
        log
    }

    #[test]
    fn test_stream_batches() {
        let dir = TempDir::new().unwrap();
        let log = source_with(&dir, 5);
        let mut stream = ReplicationStream::from_index(Arc::clone(&log), 1);

        let first = stream.next_batch(3).unwrap();
        assert_eq!(first.iter().map(|e| e.index).collect::<Vec<_>>(), vec![1, 2, 3]);
        let second = stream.next_batch(3).unwrap();
        assert_eq!(second.len(), 1);
        assert!(stream.next_batch(3).unwrap().is_empty());

        log.append(b"t", b"late").unwrap();
        assert_eq!(stream.next_batch(3).unwrap()[0].message, b"late");
    }

    #[test]
    fn test_stream_from_negative_index_starts_at_first() {
        let dir = TempDir::new().unwrap();
        let log = source_with(&dir, 2);
        let mut stream = ReplicationStream::from_index(log, -1);
        assert_eq!(stream.next_batch(10).unwrap().len(), 2);
    }

    #[test]
    fn test_sink_deduplicates_redelivered_tail() {
        let source_dir = TempDir::new().unwrap();
        let replica_dir = TempDir::new().unwrap();
        let source = source_with(&source_dir, 4);
        let replica = Arc::new(LogStore::open(replica_dir.path()).unwrap());
        let sink = ReplicationSink::new(Arc::clone(&replica), None);

        let mut stream = ReplicationStream::from_index(Arc::clone(&source), -1);
        assert_eq!(sink.apply_batch(&stream.next_batch(3).unwrap()).unwrap(), 3);

        // Reconnect asks for the last held record again.
        let mut stream = ReplicationStream::from_index(source, sink.next_index() - 1);
        assert_eq!(sink.apply_batch(&stream.next_batch(10).unwrap()).unwrap(), 1);
        assert_eq!(replica.next_index_to_append(), 4);
    }

    #[test]
    fn test_sink_applies_adaptor() {
        let dir = TempDir::new().unwrap();
        let replica = Arc::new(LogStore::open(dir.path()).unwrap());
        let sink = ReplicationSink::new(Arc::clone(&replica), Some(Arc::new(Upper)));

        sink.apply(&RawExcerpt {
            index: 0,
            topic: b"t".to_vec(),
            message: b"hello".to_vec(),
        })
        .unwrap();
        assert_eq!(replica.read_at(0).unwrap().unwrap().message, b"HELLO");
    }

    #[test]
    fn test_sink_rejects_gap() {
        let dir = TempDir::new().unwrap();
        let replica = Arc::new(LogStore::open(dir.path()).unwrap());
        let sink = ReplicationSink::new(replica, None);
        let record = |index| RawExcerpt {
            index,
            topic: b"t".to_vec(),
            message: b"m".to_vec(),
        };

        assert!(sink.apply(&record(0)).unwrap());
        assert!(matches!(
            sink.apply(&record(5)),
            Err(EngineError::ReplicationGap { expected: 1, got: 5 })
        ));
    }
}
