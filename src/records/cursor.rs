//! Cursors over a [`LogStore`].
//!
//! A cursor is owned by one execution context at a time and does no locking
//! of its own; the log it points at handles concurrent access.

use super::log::LogStore;
use crate::error::Result;
use crate::types::RawExcerpt;
use std::sync::Arc;

/// Write cursor. Appends always go to the log tail.
pub struct Appender {
    log: Arc<LogStore>,
    last_index_appended: Option<i64>,
}

impl Appender {
    pub fn new(log: Arc<LogStore>) -> Self {
        Self {
            log,
            last_index_appended: None,
        }
    }

    pub fn append(&mut self, topic: &[u8], message: &[u8]) -> Result<i64> {
        let index = self.log.append(topic, message)?;
        self.last_index_appended = Some(index);
        Ok(index)
    }

    pub fn last_index_appended(&self) -> Option<i64> {
        self.last_index_appended
    }
}

/// Read cursor, used both for sequential tailing and for replay.
pub struct Tailer {
    log: Arc<LogStore>,
    /// Index the next read will return.
    next: i64,
    last_read: Option<i64>,
}

impl Tailer {
    /// A tailer positioned at the start of the log.
    pub fn new(log: Arc<LogStore>) -> Self {
        let next = log.first_index();
        Self {
            log,
            next,
            last_read: None,
        }
    }

    /// Read the next record, or `None` when the cursor has caught up.
    ///
    /// `None` is not end-of-stream: a later call returns records appended in
    /// the meantime.
    pub fn read_next(&mut self) -> Result<Option<RawExcerpt>> {
        let first = self.log.first_index();
        if self.next < first {
            // Skip over a cleared range.
            self.next = first;
        }

        match self.log.read_at(self.next)? {
            Some(excerpt) => {
                self.last_read = Some(excerpt.index);
                self.next = excerpt.index + 1;
                Ok(Some(excerpt))
            }
            None => Ok(None),
        }
    }

    /// Position the cursor so the next read returns `index`.
    ///
    /// Returns `false`, leaving the position unchanged, if the log does not
    /// hold `index`.
    pub fn move_to_index(&mut self, index: i64) -> bool {
        if !self.log.contains(index) {
            return false;
        }
        self.next = index;
        true
    }

    /// Scan forward for the next record whose encoded topic equals `topic`.
    ///
    /// Every record read is consumed whether it matches or not, so repeated
    /// calls resume where the previous one stopped.
    pub fn read_by_topic(&mut self, topic: &[u8]) -> Result<Option<RawExcerpt>> {
        while let Some(excerpt) = self.read_next()? {
            if excerpt.topic == topic {
                return Ok(Some(excerpt));
            }
        }
        Ok(None)
    }

    pub fn to_start(&mut self) {
        self.next = self.log.first_index();
    }

    pub fn to_end(&mut self) {
        self.next = self.log.next_index_to_append();
    }

    /// Index of the last record read.
    pub fn index(&self) -> Option<i64> {
        self.last_read
    }

    /// Index the next read will try.
    pub fn position(&self) -> i64 {
        self.next
    }
}
