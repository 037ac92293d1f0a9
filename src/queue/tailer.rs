//! Typed forward-only reader over a queue.

use crate::error::Result;
use crate::records::Tailer;
use crate::types::{Excerpt, WireType};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use super::view::decode_excerpt;

/// Forward-only, non-restartable sequence over a queue.
///
/// The iterator yields `None` whenever no record is available yet, but it is
/// not fused: polling again later returns records appended in the meantime.
pub struct QueueTailer<T, M> {
    inner: Tailer,
    wire_type: WireType,
    _marker: PhantomData<fn() -> (T, M)>,
}

impl<T, M> QueueTailer<T, M>
where
    T: DeserializeOwned,
    M: DeserializeOwned,
{
    pub(crate) fn new(inner: Tailer, wire_type: WireType) -> Self {
        Self {
            inner,
            wire_type,
            _marker: PhantomData,
        }
    }

    /// Next record, or `None` if the tailer has caught up. Never blocks.
    pub fn poll(&mut self) -> Result<Option<Excerpt<T, M>>> {
        match self.inner.read_next()? {
            Some(raw) => decode_excerpt(self.wire_type, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Index the next poll will try.
    pub fn position(&self) -> i64 {
        self.inner.position()
    }
}

impl<T, M> Iterator for QueueTailer<T, M>
where
    T: DeserializeOwned,
    M: DeserializeOwned,
{
    type Item = Result<Excerpt<T, M>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.poll().transpose()
    }
}
