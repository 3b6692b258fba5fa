//! Object cache - decoded entities shared by request threads
//!
//! Two independent maps:
//! - id -> decoded entity (with the row it was decoded from)
//! - type -> ids of all entities of that type
//!
//! Nothing here expires on its own. Entries leave only through `invalidate*`
//! calls, which the facade issues on explicit `clear` and on host change
//! notifications. A load that races with an invalidation is handed to its
//! caller but never installed, so a hit is never older than the last
//! invalidation of its id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use crossbeam::sync::{ShardedLock, ShardedLockReadGuard, ShardedLockWriteGuard};
use crate::Result;
use crate::mapper::AnyInfo;
use crate::storage::ObjectRow;

/// A cached entity: the row it came from and its decoded value
#[derive(Clone)]
pub struct CachedObject {
    pub row: Arc<ObjectRow>,
    pub value: AnyInfo,
}

impl CachedObject {
    pub fn new(row: ObjectRow, value: AnyInfo) -> Self {
        Self {
            row: Arc::new(row),
            value,
        }
    }

    pub fn id(&self) -> &str {
        &self.row.id
    }
}

impl std::fmt::Debug for CachedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedObject")
            .field("id", &self.row.id)
            .field("type", &self.row.type_name)
            .finish()
    }
}

enum Slot {
    Ready(CachedObject),
    Loading(Arc<Flight>),
}

/// An in-progress load other threads can wait on
struct Flight {
    outcome: Mutex<Option<Option<CachedObject>>>,
    done: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn finish(&self, outcome: Option<CachedObject>) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(outcome);
        self.done.notify_all();
    }

    /// Block until the load ends; `None` if it failed
    fn wait(&self) -> Option<CachedObject> {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        while slot.is_none() {
            slot = self.done.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
        (*slot).clone().flatten()
    }
}

/// Finishes the flight and frees its slot even if the loader panics
struct FlightGuard<'a> {
    cache: &'a ObjectCache,
    id: &'a str,
    flight: Arc<Flight>,
    completed: bool,
}

impl FlightGuard<'_> {
    fn complete(mut self, loaded: Option<CachedObject>) {
        {
            let mut entries = self.cache.write_entries();
            if self.owns_slot(&entries) {
                match &loaded {
                    Some(object) => {
                        entries.insert(self.id.to_string(), Slot::Ready(object.clone()));
                    }
                    None => {
                        entries.remove(self.id);
                    }
                }
            } else {
                tracing::debug!("Load of {} raced with an invalidation, not caching", self.id);
            }
        }
        self.flight.finish(loaded);
        self.completed = true;
    }

    fn owns_slot(&self, entries: &HashMap<String, Slot>) -> bool {
        matches!(entries.get(self.id), Some(Slot::Loading(f)) if Arc::ptr_eq(f, &self.flight))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        {
            let mut entries = self.cache.write_entries();
            if self.owns_slot(&entries) {
                entries.remove(self.id);
            }
        }
        self.flight.finish(None);
    }
}

enum Pending {
    Owner(Arc<Flight>),
    Waiter(Arc<Flight>),
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub evictions: u64,
    pub entries: usize,
    pub listings: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cache Statistics:")?;
        writeln!(f, "  Entries: {} (listings: {})", self.entries, self.listings)?;
        writeln!(f, "  Hits: {}, misses: {}", self.hits, self.misses)?;
        writeln!(f, "  Loads: {}, evictions: {}", self.loads, self.evictions)
    }
}

/// Concurrency-safe cache of decoded entities and per-type listings
#[derive(Default)]
pub struct ObjectCache {
    entries: ShardedLock<HashMap<String, Slot>>,
    listings: ShardedLock<HashMap<String, Arc<Vec<String>>>>,
    /// Bumped under the listings write lock on every listing invalidation
    listing_epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_entries(&self) -> ShardedLockReadGuard<'_, HashMap<String, Slot>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> ShardedLockWriteGuard<'_, HashMap<String, Slot>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_listings(&self) -> ShardedLockReadGuard<'_, HashMap<String, Arc<Vec<String>>>> {
        self.listings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_listings(&self) -> ShardedLockWriteGuard<'_, HashMap<String, Arc<Vec<String>>>> {
        self.listings.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ========== Entity Entries ==========

    /// Cached entity for an id, if any
    pub fn get(&self, id: &str) -> Option<CachedObject> {
        match self.read_entries().get(id) {
            Some(Slot::Ready(object)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(object.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Install or replace the entry for an object's id
    pub fn put(&self, object: CachedObject) {
        let id = object.row.id.clone();
        self.write_entries().insert(id, Slot::Ready(object));
    }

    /// Return the cached entity or run `loader` to produce it.
    ///
    /// Concurrent misses on one id share a single load. If that load fails,
    /// each waiter runs its own loader instead and nothing is cached.
    pub fn get_or_load<F>(&self, id: &str, loader: F) -> Result<CachedObject>
    where
        F: FnOnce() -> Result<CachedObject>,
    {
        if let Some(Slot::Ready(object)) = self.read_entries().get(id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(object.clone());
        }

        let pending = {
            let mut entries = self.write_entries();
            match entries.get(id) {
                Some(Slot::Ready(object)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(object.clone());
                }
                Some(Slot::Loading(flight)) => Pending::Waiter(Arc::clone(flight)),
                None => {
                    let flight = Arc::new(Flight::new());
                    entries.insert(id.to_string(), Slot::Loading(Arc::clone(&flight)));
                    Pending::Owner(flight)
                }
            }
        };

        match pending {
            Pending::Owner(flight) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.loads.fetch_add(1, Ordering::Relaxed);
                let guard = FlightGuard { cache: self, id, flight, completed: false };
                match loader() {
                    Ok(object) => {
                        guard.complete(Some(object.clone()));
                        Ok(object)
                    }
                    Err(e) => {
                        guard.complete(None);
                        Err(e)
                    }
                }
            }
            Pending::Waiter(flight) => match flight.wait() {
                Some(object) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Ok(object)
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    self.loads.fetch_add(1, Ordering::Relaxed);
                    loader()
                }
            },
        }
    }

    /// Evict one id; returns whether anything was cached for it
    pub fn invalidate(&self, id: &str) -> bool {
        let removed = self.write_entries().remove(id).is_some();
        if removed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Evicted {}", id);
        }
        removed
    }

    /// Evict every entry of a type along with its listing. In-flight loads
    /// are dropped too since their type is not known yet.
    pub fn invalidate_type(&self, type_name: &str) {
        let evicted = {
            let mut entries = self.write_entries();
            let before = entries.len();
            entries.retain(|_, slot| match slot {
                Slot::Ready(object) => object.row.type_name != type_name,
                Slot::Loading(_) => false,
            });
            before - entries.len()
        };
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        self.invalidate_listing(type_name);
        tracing::debug!("Evicted {} entries of type {}", evicted, type_name);
    }

    /// Evict everything, entries and listings
    pub fn invalidate_all(&self) {
        let evicted = {
            let mut entries = self.write_entries();
            let n = entries.len();
            entries.clear();
            n
        };
        {
            let mut listings = self.write_listings();
            listings.clear();
            self.listing_epoch.fetch_add(1, Ordering::SeqCst);
        }
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        tracing::debug!("Evicted all {} cached entries", evicted);
    }

    // ========== Type Listings ==========

    /// Cached ids of all entities of a type, if any
    pub fn listing(&self, type_name: &str) -> Option<Arc<Vec<String>>> {
        self.read_listings().get(type_name).cloned()
    }

    pub fn put_listing(&self, type_name: &str, ids: Vec<String>) {
        self.write_listings().insert(type_name.to_string(), Arc::new(ids));
    }

    pub fn invalidate_listing(&self, type_name: &str) {
        let mut listings = self.write_listings();
        listings.remove(type_name);
        self.listing_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Return the cached listing or run `loader`; a listing invalidated
    /// while the loader ran is returned but not cached
    pub fn load_listing<F>(&self, type_name: &str, loader: F) -> Result<Arc<Vec<String>>>
    where
        F: FnOnce() -> Result<Vec<String>>,
    {
        if let Some(ids) = self.listing(type_name) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(ids);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let epoch = self.listing_epoch.load(Ordering::SeqCst);
        let ids = Arc::new(loader()?);
        let mut listings = self.write_listings();
        if self.listing_epoch.load(Ordering::SeqCst) == epoch {
            listings.insert(type_name.to_string(), Arc::clone(&ids));
        }
        Ok(ids)
    }

    // ========== Introspection ==========

    /// Number of ready entries
    pub fn len(&self) -> usize {
        self.read_entries()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
            listings: self.read_listings().len(),
        }
    }
}
