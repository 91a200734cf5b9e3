//! Page-keyed storage
//!
//! The engine keeps several maps keyed by 1-based page number: OCR results,
//! per-page load status, average line heights. They are all injected as
//! [`PageKeyedStore`] implementations. A store is plain data with `&mut self`
//! mutators; the owner decides which lock guards it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// 1-based page number
pub type PageNumber = u32;

/// A map from page number to `V`
///
/// Implementations are not synchronized. Owners wrap them in a `Mutex` (and a
/// `Condvar` where waiters need to be woken) so that every read-modify-write
/// happens under one lock.
pub trait PageKeyedStore<V> {
    /// Value stored for `page`
    fn get(&self, page: PageNumber) -> Option<&V>;

    /// Mutable value stored for `page`
    fn get_mut(&mut self, page: PageNumber) -> Option<&mut V>;

    /// Store `value` for `page`, returning the previous value
    fn insert(&mut self, page: PageNumber, value: V) -> Option<V>;

    /// Remove and return the value for `page`
    fn remove(&mut self, page: PageNumber) -> Option<V>;

    /// Remove every entry
    fn clear(&mut self);

    /// Pages with an entry, ascending
    fn pages(&self) -> Vec<PageNumber>;

    /// Number of entries
    fn len(&self) -> usize;

    /// Whether the store is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `page` has an entry
    fn contains(&self, page: PageNumber) -> bool {
        self.get(page).is_some()
    }
}

/// A boxed store shared between the worker and the UI thread
pub type SharedPageStore<V> = Arc<Mutex<Box<dyn PageKeyedStore<V> + Send>>>;

/// Wrap `store` for sharing
pub fn share_store<V, St>(store: St) -> SharedPageStore<V>
where
    St: PageKeyedStore<V> + Send + 'static,
{
    let boxed: Box<dyn PageKeyedStore<V> + Send> = Box::new(store);
    Arc::new(Mutex::new(boxed))
}

/// In-memory [`PageKeyedStore`] ordered by page number
#[derive(Debug, Clone)]
pub struct PageStore<V> {
    entries: BTreeMap<PageNumber, V>,
}

impl<V> PageStore<V> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Value for `page`, inserting `default()` first if absent
    pub fn get_or_insert_with(&mut self, page: PageNumber, default: impl FnOnce() -> V) -> &mut V {
        self.entries.entry(page).or_insert_with(default)
    }

    /// Iterate entries in page order
    pub fn iter(&self) -> impl Iterator<Item = (PageNumber, &V)> {
        self.entries.iter().map(|(page, value)| (*page, value))
    }
}

impl<V> Default for PageStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> PageKeyedStore<V> for PageStore<V> {
    fn get(&self, page: PageNumber) -> Option<&V> {
        self.entries.get(&page)
    }

    fn get_mut(&mut self, page: PageNumber) -> Option<&mut V> {
        self.entries.get_mut(&page)
    }

    fn insert(&mut self, page: PageNumber, value: V) -> Option<V> {
        self.entries.insert(page, value)
    }

    fn remove(&mut self, page: PageNumber) -> Option<V> {
        self.entries.remove(&page)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn pages(&self) -> Vec<PageNumber> {
        self.entries.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
