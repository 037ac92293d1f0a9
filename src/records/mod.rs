//! Queue log implementation.
//!
//! Records are stored in an append-only log with a dense offset index for
//! O(1) access by log index.

mod cursor;
mod index;
mod log;

pub use cursor::{Appender, Tailer};
pub use index::{Checkpoint, OffsetIndex};
pub use log::{LogStore, INDEX_FILE, LOCK_FILE, LOG_FILE};
