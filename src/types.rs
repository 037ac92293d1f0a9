//! Core types shared by the queue, map and replication layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a host within a cluster.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(pub u8);

impl fmt::Debug for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostId({})", self.0)
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded log entry: `(topic, message, index)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Excerpt<T, M> {
    pub topic: T,
    pub message: M,
    /// Assigned by the log at append time.
    pub index: i64,
}

impl<T, M> Excerpt<T, M> {
    pub fn new(topic: T, message: M, index: i64) -> Self {
        Self {
            topic,
            message,
            index,
        }
    }
}

/// A log entry as stored: encoded topic and message bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawExcerpt {
    pub index: i64,
    pub topic: Vec<u8>,
    pub message: Vec<u8>,
}

impl fmt::Debug for RawExcerpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawExcerpt")
            .field("index", &self.index)
            .field("topic_len", &self.topic.len())
            .field("message_len", &self.message.len())
            .finish()
    }
}

/// Binary/text encodings a view can be configured with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireType {
    #[default]
    Binary,
    DefaultZeroBinary,
    DeltaBinary,
    Text,
    Json,
}

impl WireType {
    /// Whether values are encoded with the compact binary codec.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            WireType::Binary | WireType::DefaultZeroBinary | WireType::DeltaBinary
        )
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireType::Binary => "BINARY",
            WireType::DefaultZeroBinary => "DEFAULT_ZERO_BINARY",
            WireType::DeltaBinary => "DELTA_BINARY",
            WireType::Text => "TEXT",
            WireType::Json => "JSON",
        };
        f.write_str(name)
    }
}

/// Values that may carry a "null" state at runtime.
///
/// Map keys and values are checked with this before they reach a store. Plain
/// Rust types are never null; dynamic payloads (`Option`, JSON values) can be.
pub trait Nullable {
    fn is_null(&self) -> bool {
        false
    }
}

macro_rules! never_null {
    ($($t:ty),* $(,)?) => {
        $(impl Nullable for $t {})*
    };
}

never_null!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    String, &str, Vec<u8>
);

impl<T> Nullable for Option<T> {
    fn is_null(&self) -> bool {
        self.is_none()
    }
}

impl Nullable for serde_json::Value {
    fn is_null(&self) -> bool {
        matches!(self, serde_json::Value::Null)
    }
}
