//! Queue views: typed publish, point reads, topic scans and tailing over a
//! log, with writes gated by the replication role.

use crate::asset::Asset;
use crate::codec;
use crate::config::{QueueConfig, QueueOptions};
use crate::error::{EngineError, Result};
use crate::records::{LogStore, Tailer};
use crate::replication::{ReplicationCoordinator, ReplicationSink, ReplicationStream};
use crate::session::SessionManager;
use crate::subscriptions::{MapEvent, Subscriber, SubscriptionId, TopicSubscriber};
use crate::types::{Excerpt, RawExcerpt, WireType};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::tailer::QueueTailer;
use super::teardown::{delete_recursive, StorageOwner};

/// Publishes messages to a single topic.
pub trait TopicPublisher<M>: Send + Sync {
    fn publish(&self, message: M) -> Result<()>;
}

/// Fails unless `wire_type` is one a queue can be written with.
pub fn validate_wire_type(wire_type: WireType) -> Result<()> {
    match wire_type {
        WireType::Binary | WireType::DefaultZeroBinary => Ok(()),
        WireType::DeltaBinary => Err(EngineError::InvalidWireType(
            "DELTA_BINARY is not supported for queues, use BINARY or DEFAULT_ZERO_BINARY".into(),
        )),
        other => Err(EngineError::InvalidWireType(format!(
            "{} is not supported for queues, only BINARY and DEFAULT_ZERO_BINARY are allowed",
            other
        ))),
    }
}

pub(crate) fn decode_excerpt<T, M>(wire_type: WireType, raw: &RawExcerpt) -> Result<Excerpt<T, M>>
where
    T: DeserializeOwned,
    M: DeserializeOwned,
{
    Ok(Excerpt::new(
        codec::decode(wire_type, &raw.topic)?,
        codec::decode(wire_type, &raw.message)?,
        raw.index,
    ))
}

/// A topic-keyed, append-only queue at one asset path.
///
/// Each calling thread gets its own cursors through the session manager, so a
/// view can be shared across threads. Writes are rejected when this host is a
/// replication sink for the queue.
pub struct QueueView<T, M> {
    path: String,
    dir: PathBuf,
    dont_persist: bool,
    config: QueueConfig,
    log: Arc<LogStore>,
    sessions: SessionManager,
    replication: ReplicationCoordinator,
    closed: AtomicBool,
    _marker: PhantomData<fn() -> (T, M)>,
}

impl<T, M> QueueView<T, M>
where
    T: Serialize + DeserializeOwned,
    M: Serialize + DeserializeOwned,
{
    /// Open the queue at `asset`, creating its storage if needed.
    pub fn new(asset: &dyn Asset, options: QueueOptions) -> Result<Self> {
        let path = asset.full_name().to_string();
        let config = match asset.queue_config() {
            Some(config) => config,
            None => {
                warn!(path = %path, "unable to find the queue config");
                return Err(EngineError::ConfigNotFound(path));
            }
        };
        validate_wire_type(config.wire_type)?;

        let dir = options.queue_dir(&path, asset.host_id());
        std::fs::create_dir_all(&dir)?;
        let log = Arc::new(LogStore::open_with(
            &dir,
            options.sync_interval,
            options.read_cache_size,
        )?);
        let replication = ReplicationCoordinator::start(asset, &options, &config, &log)?;

        info!(
            path = %path,
            dir = %dir.display(),
            wire_type = %config.wire_type,
            next_index = log.next_index_to_append(),
            "opened queue"
        );

        Ok(Self {
            path,
            dir,
            dont_persist: options.dont_persist,
            config,
            sessions: SessionManager::new(Arc::clone(&log)),
            log,
            replication,
            closed: AtomicBool::new(false),
            _marker: PhantomData,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn wire_type(&self) -> WireType {
        self.config.wire_type
    }

    pub fn is_source(&self) -> bool {
        self.replication.is_source()
    }

    pub fn is_replicating(&self) -> bool {
        self.replication.is_replicating()
    }

    pub fn replication(&self) -> &ReplicationCoordinator {
        &self.replication
    }

    /// Append `message` under `topic`, returning its index.
    pub fn publish(&self, topic: &T, message: &M) -> Result<i64> {
        self.publish_and_index(topic, message)
    }

    /// Append `message` under the empty (default) topic, returning its index.
    pub fn set(&self, message: &M) -> Result<i64>
    where
        T: Default,
    {
        self.publish_and_index(&T::default(), message)
    }

    /// Append `message` under `topic`, returning its index.
    ///
    /// Fails with `SinkWrite` before touching the log if this host is a
    /// replication sink.
    pub fn publish_and_index(&self, topic: &T, message: &M) -> Result<i64> {
        self.ensure_open()?;
        self.replication.check_writable()?;

        let wire_type = self.wire_type();
        let topic = codec::encode(wire_type, topic)?;
        let message = codec::encode(wire_type, message)?;
        self.sessions
            .with_current(|session| session.appender.append(&topic, &message))
    }

    /// Record at `index`, or `None` if the queue does not hold it.
    ///
    /// Moves this thread's replay cursor to just after the record.
    pub fn get(&self, index: i64) -> Result<Option<Excerpt<T, M>>> {
        self.ensure_open()?;
        let raw = self.sessions.with_current(|session| {
            if session.replay.move_to_index(index) {
                session.replay.read_next()
            } else {
                Ok(None)
            }
        })?;
        raw.map(|raw| decode_excerpt(self.wire_type(), &raw)).transpose()
    }

    /// Next record under `topic`, scanning from this thread's current replay
    /// position.
    ///
    /// This is an incremental scan, not a search: every record read is
    /// consumed, so a second call resumes after the first match and a miss
    /// leaves the cursor at the tail. Call [`rewind_replay`](Self::rewind_replay)
    /// first to scan the whole queue.
    pub fn get_topic(&self, topic: &T) -> Result<Option<Excerpt<T, M>>> {
        self.ensure_open()?;
        let topic = codec::encode(self.wire_type(), topic)?;
        let raw = self
            .sessions
            .with_current(|session| session.replay.read_by_topic(&topic))?;
        raw.map(|raw| decode_excerpt(self.wire_type(), &raw)).transpose()
    }

    /// Move this thread's replay cursor back to the first record.
    pub fn rewind_replay(&self) -> Result<()> {
        self.ensure_open()?;
        self.sessions.with_current(|session| session.replay.to_start());
        Ok(())
    }

    /// Hand the next record on this thread's sequential reader to `consumer`.
    ///
    /// Returns `false` if there was nothing to read yet.
    pub fn read_next(&self, consumer: impl FnOnce(Excerpt<T, M>)) -> Result<bool> {
        self.ensure_open()?;
        let raw = self
            .sessions
            .with_current(|session| session.tailer.read_next())?;
        match raw {
            Some(raw) => {
                consumer(decode_excerpt(self.wire_type(), &raw)?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// A fresh forward-only tailer starting at the first record.
    pub fn tailer(&self) -> Result<QueueTailer<T, M>> {
        self.ensure_open()?;
        Ok(QueueTailer::new(
            Tailer::new(Arc::clone(&self.log)),
            self.wire_type(),
        ))
    }

    pub fn first_index(&self) -> i64 {
        self.log.first_index()
    }

    /// Index of the most recent record, `next_index() - 1`.
    ///
    /// This is the last written position, one below the next write position,
    /// so a fresh queue reports `first_index() - 1`.
    pub fn last_index(&self) -> i64 {
        self.log.next_index_to_append() - 1
    }

    /// Index the next publish will be assigned.
    pub fn next_index(&self) -> i64 {
        self.log.next_index_to_append()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Drop every record. Indices keep increasing from where they were.
    pub fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        self.log.clear()
    }

    /// Debug listing of every record.
    pub fn dump(&self) -> Result<String> {
        self.ensure_open()?;
        self.log.dump()
    }

    /// Stream of this queue's records for a replica, starting at `from`.
    pub fn replication_stream(&self, from: i64) -> Result<ReplicationStream> {
        self.ensure_open()?;
        Ok(ReplicationStream::from_index(Arc::clone(&self.log), from))
    }

    /// Write path for records arriving from the source.
    ///
    /// Bypasses the sink write check and applies the configured message
    /// adaptor.
    pub fn replication_sink(&self) -> Result<ReplicationSink> {
        self.ensure_open()?;
        Ok(ReplicationSink::new(
            Arc::clone(&self.log),
            self.config.message_adaptor.clone(),
        ))
    }

    pub fn register_topic_subscriber(
        &self,
        _subscriber: Arc<dyn TopicSubscriber<T, M>>,
    ) -> Result<SubscriptionId> {
        Err(self.unsupported("register_topic_subscriber"))
    }

    pub fn unregister_topic_subscriber(&self, _id: SubscriptionId) -> Result<()> {
        Err(self.unsupported("unregister_topic_subscriber"))
    }

    pub fn register_key_subscriber(&self, _subscriber: Arc<dyn Subscriber<T>>) -> Result<SubscriptionId> {
        Err(self.unsupported("register_key_subscriber"))
    }

    pub fn register_event_subscriber(
        &self,
        _subscriber: Arc<dyn Subscriber<MapEvent<T, M>>>,
    ) -> Result<SubscriptionId> {
        Err(self.unsupported("register_event_subscriber"))
    }

    /// Publisher bound to one topic.
    pub fn publisher(&self, _topic: &T) -> Result<Arc<dyn TopicPublisher<M>>> {
        Err(self.unsupported("publisher"))
    }

    /// Subscribe to one topic.
    pub fn register_subscriber(
        &self,
        _topic: &T,
        _subscriber: Arc<dyn Subscriber<M>>,
    ) -> Result<SubscriptionId> {
        Err(self.unsupported("register_subscriber"))
    }

    pub fn unregister_subscriber(&self, _topic: &T, _id: SubscriptionId) -> Result<()> {
        Err(self.unsupported("unregister_subscriber"))
    }

    pub fn subscriber_count(&self, _topic: &T) -> Result<usize> {
        Err(self.unsupported("subscriber_count"))
    }

    fn unsupported(&self, operation: &str) -> EngineError {
        EngineError::Unsupported(format!("{} on queue {}", operation, self.path))
    }
}

impl<T, M> QueueView<T, M> {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release cursors, stop replication and close the log. Transient queues
    /// then delete their storage. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.sessions.close();
        self.replication.close();
        let result = self.log.close();

        if let Some(dir) = self.owned_storage() {
            let failures = delete_recursive(dir);
            if failures > 0 {
                warn!(path = %self.path, failures, "queue storage only partly deleted");
            }
        }
        debug!(path = %self.path, "closed queue");
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::Closed(self.path.clone()));
        }
        Ok(())
    }
}

impl<T, M> StorageOwner for QueueView<T, M> {
    fn owned_storage(&self) -> Option<&Path> {
        if self.dont_persist {
            Some(&self.dir)
        } else {
            None
        }
    }
}

impl<T, M> Drop for QueueView<T, M> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path, error = %e, "error closing queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::StaticAsset;
    use crate::types::HostId;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> QueueView<String, String> {
        let asset = StaticAsset::new("/queues/trades").with_queue_config(QueueConfig::new(HostId(1)));
        let options = QueueOptions {
            name: "trades".into(),
            base_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        QueueView::new(&asset, options).unwrap()
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_publish_and_get() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);

        let index = queue.publish(&s("AAPL"), &s("buy")).unwrap();
        let excerpt = queue.get(index).unwrap().unwrap();

        assert_eq!(excerpt, Excerpt::new(s("AAPL"), s("buy"), index));
        assert!(queue.get(index + 1).unwrap().is_none());
    }

    #[test]
    fn test_set_uses_empty_topic() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);

        let index = queue.set(&s("untopiced")).unwrap();
        assert_eq!(
            queue.get(index).unwrap().unwrap(),
            Excerpt::new(String::new(), s("untopiced"), index)
        );
    }

    #[test]
    fn test_last_index_trails_next_index() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);
        assert_eq!(queue.next_index(), 0);
        assert_eq!(queue.last_index(), -1);

        let first = queue.publish(&s("AAPL"), &s("buy")).unwrap();
        let second = queue.publish(&s("MSFT"), &s("sell")).unwrap();
        assert_eq!(queue.last_index(), second);
        assert_eq!(queue.next_index(), second + 1);
        assert_eq!(second, first + 1);
    }

    #[test]
    fn test_get_topic_resumes_from_replay_position() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);
        queue.publish(&s("a"), &s("1")).unwrap();
        queue.publish(&s("b"), &s("2")).unwrap();
        queue.publish(&s("a"), &s("3")).unwrap();

        assert_eq!(queue.get_topic(&s("a")).unwrap().unwrap().message, "1");
        assert_eq!(queue.get_topic(&s("a")).unwrap().unwrap().message, "3");
        assert!(queue.get_topic(&s("b")).unwrap().is_none());

        queue.rewind_replay().unwrap();
        assert_eq!(queue.get_topic(&s("b")).unwrap().unwrap().message, "2");
    }

    #[test]
    fn test_read_next() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);
        let mut seen = Vec::new();

        assert!(!queue.read_next(|e| seen.push(e.message)).unwrap());
        queue.publish(&s("t"), &s("m")).unwrap();
        assert!(queue.read_next(|e| seen.push(e.message)).unwrap());
        assert!(!queue.read_next(|e| seen.push(e.message)).unwrap());

        assert_eq!(seen, vec![s("m")]);
    }

    #[test]
    fn test_rejects_delta_wire_type() {
        let dir = TempDir::new().unwrap();
        let asset = StaticAsset::new("/queues/trades")
            .with_queue_config(QueueConfig::new(HostId(1)).with_wire_type(WireType::DeltaBinary));
        let options = QueueOptions {
            base_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let err = QueueView::<String, String>::new(&asset, options).err().unwrap();
        assert!(err.to_string().contains("DELTA_BINARY"));
        assert!(validate_wire_type(WireType::Text).is_err());
        assert!(validate_wire_type(WireType::DefaultZeroBinary).is_ok());
    }

    #[test]
    fn test_operations_after_close() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);
        queue.close().unwrap();
        queue.close().unwrap();

        assert!(matches!(
            queue.publish(&s("t"), &s("m")),
            Err(EngineError::Closed(_))
        ));
        assert!(queue.tailer().is_err());
    }
}
