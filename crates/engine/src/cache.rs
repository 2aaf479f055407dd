//! Process-wide store of collection and detail views.
//!
//! Readers see whatever was last written. Background fetches go through
//! [`FetchToken`]s: a fetch that was cancelled or superseded can no longer
//! write, which is what keeps a slow refetch from clobbering an optimistic
//! write made after it started.

use std::collections::{HashMap, VecDeque};

use catalog_core::{CacheKey, CollectionKey, CollectionScope, CollectionView, DetailKey, Entity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedView {
    Collection(CollectionView),
    Detail(Entity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchToken {
    key: CacheKey,
    seq: u64,
}

impl FetchToken {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

#[derive(Debug, Default)]
struct CacheEntry {
    view: Option<CachedView>,
    stale: bool,
    in_flight: Option<u64>,
}

#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<CacheKey, CacheEntry>,
    next_seq: u64,
    refetch_queue: VecDeque<CacheKey>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn collection(&self, key: &CollectionKey) -> Option<&CollectionView> {
        match self.view(&CacheKey::Collection(key.clone())) {
            Some(CachedView::Collection(view)) => Some(view),
            _ => None,
        }
    }

    pub fn detail(&self, key: &DetailKey) -> Option<&Entity> {
        match self.view(&CacheKey::Detail(key.clone())) {
            Some(CachedView::Detail(entity)) => Some(entity),
            _ => None,
        }
    }

    fn view(&self, key: &CacheKey) -> Option<&CachedView> {
        self.entries.get(key).and_then(|e| e.view.as_ref())
    }

    /// Every cached collection key of `scope`, whatever its query params.
    pub fn collection_keys(&self, scope: &CollectionScope) -> Vec<CollectionKey> {
        let mut keys: Vec<CollectionKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.view.is_some())
            .filter_map(|(key, _)| match key {
                CacheKey::Collection(k) if &k.scope() == scope => Some(k.clone()),
                _ => None,
            })
            .collect();
        keys.sort();
        keys
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.entries.get(key).is_some_and(|e| e.stale)
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.entries.get(key).is_some_and(|e| e.in_flight.is_some())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub fn set_collection(&mut self, key: CollectionKey, view: CollectionView) {
        self.write(CacheKey::Collection(key), CachedView::Collection(view));
    }

    pub fn set_detail(&mut self, key: DetailKey, entity: Entity) {
        self.write(CacheKey::Detail(key), CachedView::Detail(entity));
    }

    fn write(&mut self, key: CacheKey, view: CachedView) {
        let entry = self.entries.entry(key).or_default();
        entry.view = Some(view);
        entry.stale = false;
    }

    /// Apply `f` to a cached collection in place. Returns false when the
    /// collection is not cached.
    pub fn update_collection(
        &mut self,
        key: &CollectionKey,
        f: impl FnOnce(&mut CollectionView),
    ) -> bool {
        match self
            .entries
            .get_mut(&CacheKey::Collection(key.clone()))
            .and_then(|e| e.view.as_mut())
        {
            Some(CachedView::Collection(view)) => {
                f(view);
                true
            }
            _ => false,
        }
    }

    pub fn update_detail(&mut self, key: &DetailKey, f: impl FnOnce(&mut Entity)) -> bool {
        match self
            .entries
            .get_mut(&CacheKey::Detail(key.clone()))
            .and_then(|e| e.view.as_mut())
        {
            Some(CachedView::Detail(entity)) => {
                f(entity);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CachedView> {
        self.entries.remove(key).and_then(|e| e.view)
    }

    // ========================================================================
    // Staleness and refetching
    // ========================================================================

    /// Mark a cached view stale so the next reader refetches it. Unknown
    /// keys are ignored.
    pub fn invalidate(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.get_mut(key)
            && entry.view.is_some()
        {
            entry.stale = true;
        }
    }

    /// Invalidate every collection view of `scope`.
    pub fn invalidate_scope(&mut self, scope: &CollectionScope) {
        for key in self.collection_keys(scope) {
            self.invalidate(&CacheKey::Collection(key));
        }
    }

    /// Mark `key` stale and ask for a background refetch.
    pub fn revalidate(&mut self, key: CacheKey) {
        self.invalidate(&key);
        if !self.refetch_queue.contains(&key) {
            self.refetch_queue.push_back(key);
        }
    }

    /// Drain pending refetch requests, oldest first.
    pub fn take_refetch_requests(&mut self) -> Vec<CacheKey> {
        self.refetch_queue.drain(..).collect()
    }

    /// Start a fetch for `key`, superseding any fetch already in flight.
    pub fn begin_fetch(&mut self, key: CacheKey) -> FetchToken {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.entries.entry(key.clone()).or_default().in_flight = Some(seq);
        FetchToken { key, seq }
    }

    /// Store a fetch result. Returns false, leaving the cache untouched, when
    /// the fetch was cancelled or superseded or the data does not fit the key.
    pub fn complete_fetch(&mut self, token: FetchToken, view: CachedView) -> bool {
        let fits = matches!(
            (&token.key, &view),
            (CacheKey::Collection(_), CachedView::Collection(_))
                | (CacheKey::Detail(_), CachedView::Detail(_))
        );
        let Some(entry) = self.entries.get_mut(&token.key) else {
            return false;
        };
        if entry.in_flight != Some(token.seq) {
            tracing::debug!(key = ?token.key, "dropping result of cancelled fetch");
            return false;
        }
        entry.in_flight = None;
        if !fits {
            tracing::warn!(key = ?token.key, "fetch result does not match key");
            return false;
        }
        entry.view = Some(view);
        entry.stale = false;
        true
    }

    /// Cancel the in-flight fetch for `key`. Returns whether one was running.
    pub fn cancel_fetch(&mut self, key: &CacheKey) -> bool {
        self.entries
            .get_mut(key)
            .and_then(|e| e.in_flight.take())
            .is_some()
    }
}
