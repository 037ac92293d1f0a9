//! Filter chains applied in front of a subscriber.

use super::types::Subscriber;
use crate::error::{EngineError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// One stage of a filter chain.
pub enum Operation<E> {
    /// Drop the message unless the predicate holds.
    Filter(Arc<dyn Fn(&E) -> bool + Send + Sync>),
    /// Replace the message.
    Map(Arc<dyn Fn(E) -> E + Send + Sync>),
    /// Expand the message into zero or more messages, each of which runs
    /// through the remaining stages.
    FlatMap(Arc<dyn Fn(E) -> Vec<E> + Send + Sync>),
    /// Reserved. Delivery through this stage fails with `Unsupported`.
    Project,
}

impl<E> Clone for Operation<E> {
    fn clone(&self) -> Self {
        match self {
            Operation::Filter(f) => Operation::Filter(Arc::clone(f)),
            Operation::Map(f) => Operation::Map(Arc::clone(f)),
            Operation::FlatMap(f) => Operation::FlatMap(Arc::clone(f)),
            Operation::Project => Operation::Project,
        }
    }
}

impl<E> fmt::Debug for Operation<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Filter(_) => "FILTER",
            Operation::Map(_) => "MAP",
            Operation::FlatMap(_) => "FLAT_MAP",
            Operation::Project => "PROJECT",
        };
        f.write_str(name)
    }
}

/// Ordered list of operations.
///
/// ```ignore
/// let filter = Filter::new().filter(|x: &i32| *x > 0).map(|x| x * 2);
/// ```
#[derive(Debug)]
pub struct Filter<E> {
    operations: Vec<Operation<E>>,
}

impl<E> Clone for Filter<E> {
    fn clone(&self) -> Self {
        Self {
            operations: self.operations.clone(),
        }
    }
}

impl<E> Default for Filter<E> {
    fn default() -> Self {
        Self {
            operations: Vec::new(),
        }
    }
}

impl<E> Filter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.operations.push(Operation::Filter(Arc::new(predicate)));
        self
    }

    pub fn map(mut self, function: impl Fn(E) -> E + Send + Sync + 'static) -> Self {
        self.operations.push(Operation::Map(Arc::new(function)));
        self
    }

    pub fn flat_map(mut self, function: impl Fn(E) -> Vec<E> + Send + Sync + 'static) -> Self {
        self.operations.push(Operation::FlatMap(Arc::new(function)));
        self
    }

    pub fn project(mut self) -> Self {
        self.operations.push(Operation::Project);
        self
    }

    pub fn push(&mut self, operation: Operation<E>) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[Operation<E>] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Whether the chain holds a PROJECT stage anywhere.
    pub fn has_project(&self) -> bool {
        self.operations
            .iter()
            .any(|operation| matches!(operation, Operation::Project))
    }
}

/// Runs messages through a [`Filter`] before handing them to a subscriber.
pub struct FilteredSubscriber<E> {
    filter: Filter<E>,
    subscriber: Arc<dyn Subscriber<E>>,
}

impl<E> FilteredSubscriber<E> {
    pub fn new(filter: Filter<E>, subscriber: Arc<dyn Subscriber<E>>) -> Self {
        Self { filter, subscriber }
    }

    /// Apply stages starting at `stage`, then deliver.
    fn deliver_from(&self, mut message: E, stage: usize) -> Result<()> {
        for (position, operation) in self.filter.operations.iter().enumerate().skip(stage) {
            match operation {
                Operation::Filter(predicate) => {
                    if !predicate(&message) {
                        return Ok(());
                    }
                }
                Operation::Map(function) => message = function(message),
                Operation::FlatMap(function) => {
                    let mut invalid = false;
                    for element in function(message) {
                        // One failed branch must not starve the others.
                        match self.deliver_from(element, position + 1) {
                            Ok(()) => {}
                            Err(e) if e.is_invalid_subscriber() => invalid = true,
                            Err(e) => warn!(error = %e, "flat-map delivery failed, skipping element"),
                        }
                    }
                    if invalid {
                        return Err(EngineError::InvalidSubscriber);
                    }
                    return Ok(());
                }
                Operation::Project => return Err(project_unsupported()),
            }
        }
        self.subscriber.on_message(message)
    }
}

fn project_unsupported() -> EngineError {
    EngineError::Unsupported("PROJECT filter operation".into())
}

impl<E: Send> Subscriber<E> for FilteredSubscriber<E> {
    /// Fails with `Unsupported` before any stage runs if the chain holds a
    /// PROJECT stage, wherever it sits.
    fn on_message(&self, message: E) -> Result<()> {
        if self.filter.has_project() {
            return Err(project_unsupported());
        }
        self.deliver_from(message, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collector<E: Send + 'static>() -> (Arc<Mutex<Vec<E>>>, Arc<dyn Subscriber<E>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscriber: Arc<dyn Subscriber<E>> = Arc::new(move |e: E| -> Result<()> {
            sink.lock().push(e);
            Ok(())
        });
        (seen, subscriber)
    }

    #[test]
    fn test_filter_then_map() {
        let (seen, subscriber) = collector::<i32>();
        let filtered =
            FilteredSubscriber::new(Filter::<i32>::new().filter(|x| *x > 0).map(|x| x * 2), subscriber);

        for x in [-1, 2, 3] {
            filtered.on_message(x).unwrap();
        }
        assert_eq!(*seen.lock(), vec![4, 6]);
    }

    #[test]
    fn test_flat_map_runs_remaining_stages() {
        let (seen, subscriber) = collector::<i32>();
        let filtered = FilteredSubscriber::new(
            Filter::<i32>::new()
                .flat_map(|x| vec![x, x + 1, x + 2])
                .filter(|x| x % 2 == 0)
                .map(|x| x * 10),
            subscriber,
        );

        filtered.on_message(1).unwrap();
        assert_eq!(*seen.lock(), vec![20]);
    }

    #[test]
    fn test_flat_map_isolates_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscriber: Arc<dyn Subscriber<&'static str>> =
            Arc::new(move |e: &'static str| -> Result<()> {
                if e == "b" {
                    return Err(EngineError::Serialization("bad element".into()));
                }
                sink.lock().push(e);
                Ok(())
            });

        let filtered =
            FilteredSubscriber::new(Filter::<&'static str>::new().flat_map(|_| vec!["a", "b", "c"]), subscriber);

        filtered.on_message("x").unwrap();
        assert_eq!(*seen.lock(), vec!["a", "c"]);
    }

    #[test]
    fn test_project_is_unsupported() {
        let (seen, subscriber) = collector::<i32>();
        let filtered = FilteredSubscriber::new(Filter::<i32>::new().project(), subscriber);

        assert!(matches!(
            filtered.on_message(1),
            Err(EngineError::Unsupported(_))
        ));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_project_after_flat_map_is_unsupported() {
        let (seen, subscriber) = collector::<i32>();
        let filtered = FilteredSubscriber::new(
            Filter::<i32>::new().flat_map(|x| vec![x, x]).project(),
            subscriber,
        );

        assert!(matches!(
            filtered.on_message(1),
            Err(EngineError::Unsupported(_))
        ));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_flat_map_reports_invalid_subscriber_after_fan_out() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscriber: Arc<dyn Subscriber<&'static str>> =
            Arc::new(move |e: &'static str| -> Result<()> {
                if e == "b" {
                    return Err(EngineError::InvalidSubscriber);
                }
                sink.lock().push(e);
                Ok(())
            });
        let filtered = FilteredSubscriber::new(
            Filter::<&'static str>::new().flat_map(|_| vec!["a", "b", "c"]),
            subscriber,
        );

        assert!(matches!(
            filtered.on_message("x"),
            Err(EngineError::InvalidSubscriber)
        ));
        assert_eq!(*seen.lock(), vec!["a", "c"]);
    }

    #[test]
    fn test_empty_filter_passes_through() {
        let (seen, subscriber) = collector::<i32>();
        let filtered = FilteredSubscriber::new(Filter::<i32>::new(), subscriber);
        filtered.on_message(7).unwrap();
        assert_eq!(*seen.lock(), vec![7]);
    }
}
