//! Per-context cursor bundles over a log.
//!
//! Cursors are not safe to share, so every execution context gets its own
//! writer, sequential reader and replay reader. Bundles are created lazily on
//! first use, reused for the life of the manager and dropped together when
//! the owning view closes.

use crate::records::{Appender, LogStore, Tailer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::debug;

/// Identifies the execution context that owns a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextId {
    /// An OS thread.
    Thread(ThreadId),
    /// A caller-assigned worker, e.g. one per connection.
    Worker(u64),
}

impl ContextId {
    /// The calling thread.
    pub fn current() -> Self {
        ContextId::Thread(thread::current().id())
    }
}

/// Cursor bundle owned by one context.
pub struct Session {
    pub appender: Appender,
    pub tailer: Tailer,
    pub replay: Tailer,
}

impl Session {
    fn new(log: &Arc<LogStore>) -> Self {
        Self {
            appender: Appender::new(Arc::clone(log)),
            tailer: Tailer::new(Arc::clone(log)),
            replay: Tailer::new(Arc::clone(log)),
        }
    }
}

/// Keyed cache of sessions, one per context.
pub struct SessionManager {
    log: Arc<LogStore>,
    sessions: Mutex<HashMap<ContextId, Arc<Mutex<Session>>>>,
}

impl SessionManager {
    pub fn new(log: Arc<LogStore>) -> Self {
        Self {
            log,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Session for `context`, created on first request.
    ///
    /// Entries are never evicted here. Contexts are long-lived threads or
    /// workers, and a `ThreadId` is never reused, so an exited thread's
    /// session only holds cursors until the owning view calls [`close`].
    ///
    /// [`close`]: SessionManager::close
    pub fn session(&self, context: ContextId) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(context).or_insert_with(|| {
            debug!(?context, "creating session");
            Arc::new(Mutex::new(Session::new(&self.log)))
        });
        Arc::clone(session)
    }

    /// Run `f` with the session of `context`.
    pub fn with_session<R>(&self, context: ContextId, f: impl FnOnce(&mut Session) -> R) -> R {
        let session = self.session(context);
        let mut guard = session.lock();
        f(&mut guard)
    }

    /// Run `f` with the calling thread's session.
    pub fn with_current<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        self.with_session(ContextId::current(), f)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Drop every session.
    pub fn close(&self) {
        self.sessions.lock().clear();
    }
}
