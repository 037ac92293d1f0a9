//! Key/value map views over a segmented store.
//!
//! - [`KeyValueStore`]: the store boundary (segments, entry visitation,
//!   point operations)
//! - [`SegmentedStore`]: in-memory store publishing [`MapEvent`]s
//! - [`MapView`]: null-checked map API with derived key/entry/value views
//!   and subscriptions
//!
//! [`MapEvent`]: crate::subscriptions::MapEvent

mod collections;
mod store;
mod view;

pub use collections::{EntryIter, EntrySet, KeySet, MapEntry, Values, ValuesIter};
pub use store::{EntryVisitor, KeyValueStore, SegmentedStore};
pub use view::MapView;
