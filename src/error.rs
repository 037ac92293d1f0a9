//! Error types for the engine.

use crate::types::HostId;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue config not found for asset: {0}")]
    ConfigNotFound(String),

    #[error("Invalid wire type: {0}")]
    InvalidWireType(String),

    #[error("You can not publish to a sink used in replication, you have to publish to the source (local host {local}, source host {source_host})")]
    SinkWrite { local: HostId, source_host: HostId },

    #[error("Replication handler unavailable: {0}")]
    HandlerUnavailable(String),

    #[error("{0} can not be null")]
    NullNotAllowed(&'static str),

    #[error("Subscriber is no longer valid")]
    InvalidSubscriber,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("View is closed: {0}")]
    Closed(String),

    #[error("Log is locked by another owner")]
    Locked,

    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Replication gap: expected index {expected}, received {got}")]
    ReplicationGap { expected: i64, got: i64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for EngineError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for EngineError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        EngineError::Deserialization(e.to_string())
    }
}

impl EngineError {
    /// True for the delivery signal that asks a registry to drop the subscriber.
    pub fn is_invalid_subscriber(&self) -> bool {
        matches!(self, EngineError::InvalidSubscriber)
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
