//! Property-based tests for index assignment, filter chains and map equality.

use chronicle_engine::records::LogStore;
use chronicle_engine::{
    Filter, FilteredSubscriber, MapOptions, MapView, RawExcerpt, Result, Subscriber,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

fn any_records() -> impl Strategy<Value = Vec<(Vec<u8>, Vec<u8>)>> {
    proptest::collection::vec(
        (
            proptest::collection::vec(any::<u8>(), 0..16),
            proptest::collection::vec(any::<u8>(), 0..256),
        ),
        1..40,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Appends get contiguous, strictly increasing indices and read back intact.
    #[test]
    fn test_append_indices_are_contiguous(records in any_records()) {
        let dir = TempDir::new().unwrap();
        let log = LogStore::open(dir.path()).unwrap();

        let indices: Vec<i64> = records
            .iter()
            .map(|(topic, message)| log.append(topic, message).unwrap())
            .collect();

        prop_assert_eq!(indices.clone(), (0..records.len() as i64).collect::<Vec<_>>());
        for (index, (topic, message)) in indices.iter().zip(&records) {
            let excerpt = log.read_at(*index).unwrap().unwrap();
            prop_assert_eq!(&excerpt.topic, topic);
            prop_assert_eq!(&excerpt.message, message);
        }
    }

    /// Reopening and clearing never hand out an index twice.
    #[test]
    fn test_indices_never_reused(
        first in 1usize..20,
        second in 1usize..20,
        clear_between in any::<bool>(),
    ) {
        let dir = TempDir::new().unwrap();
        let mut seen = Vec::new();
        {
            let log = LogStore::open(dir.path()).unwrap();
            for _ in 0..first {
                seen.push(log.append(b"t", b"m").unwrap());
            }
            if clear_between {
                log.clear().unwrap();
            }
            log.close().unwrap();
        }

        let log = LogStore::open(dir.path()).unwrap();
        for _ in 0..second {
            seen.push(log.append(b"t", b"m").unwrap());
        }
        prop_assert!(seen.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(log.next_index_to_append(), (first + second) as i64);
    }

    /// Replicated delivery with redelivered prefixes converges on the source log.
    #[test]
    fn test_replicated_redelivery_is_idempotent(
        count in 1i64..30,
        overlaps in proptest::collection::vec(0i64..5, 1..6),
    ) {
        let dir = TempDir::new().unwrap();
        let sink = LogStore::open(dir.path()).unwrap();
        let record = |index: i64| RawExcerpt {
            index,
            topic: b"t".to_vec(),
            message: index.to_le_bytes().to_vec(),
        };

        let mut cursor = 0;
        for overlap in overlaps.iter().cycle().take(count as usize) {
            let from = (cursor - overlap).max(0);
            for index in from..=cursor.min(count - 1) {
                sink.append_replicated(&record(index)).unwrap();
            }
            cursor += 1;
        }
        for index in 0..count {
            sink.append_replicated(&record(index)).unwrap();
        }

        prop_assert_eq!(sink.next_index_to_append(), count);
        for index in 0..count {
            prop_assert_eq!(sink.read_at(index).unwrap().unwrap(), record(index));
        }
    }

    /// A FILTER then MAP chain delivers what the equivalent iterator yields.
    #[test]
    fn test_filter_chain_matches_iterator(
        inputs in proptest::collection::vec(-1000i64..1000, 0..100),
        threshold in -100i64..100,
        factor in 1i64..5,
    ) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let d = Arc::clone(&delivered);
        let subscriber: Arc<dyn Subscriber<i64>> = Arc::new(move |x: i64| -> Result<()> {
            d.lock().push(x);
            Ok(())
        });
        let filtered = FilteredSubscriber::new(
            Filter::new()
                .filter(move |x: &i64| *x > threshold)
                .map(move |x| x * factor),
            subscriber,
        );

        for x in &inputs {
            filtered.on_message(*x).unwrap();
        }

        let expected: Vec<i64> = inputs
            .iter()
            .filter(|x| **x > threshold)
            .map(|x| x * factor)
            .collect();
        prop_assert_eq!(&*delivered.lock(), &expected);
    }

    /// Map equality depends on contents only, not on how segments split them.
    #[test]
    fn test_map_equality_independent_of_segments(
        entries in proptest::collection::hash_map("[a-z]{1,6}", any::<i32>(), 0..40),
        left_segments in 1usize..17,
        right_segments in 1usize..17,
    ) {
        let left = MapView::<String, i32>::in_memory("/l", left_segments, MapOptions::default());
        let right = MapView::<String, i32>::in_memory("/r", right_segments, MapOptions::default());
        left.put_all(entries.clone()).unwrap();
        let mut reversed: Vec<_> = entries.clone().into_iter().collect();
        reversed.reverse();
        right.put_all(reversed).unwrap();

        prop_assert!(left == right);
        prop_assert_eq!(left.size(), entries.len());

        let collected: HashMap<String, i32> = left
            .entry_set()
            .iter()
            .map(|entry| entry.into_pair())
            .collect();
        prop_assert_eq!(collected, entries);
    }
}
