//! ConfigDatabase - the public facade
//!
//! Sequences mapper, store and cache:
//! - writes go to the store first, then the cache receives a freshly
//!   decoded copy (never the caller's instance)
//! - reads hit the cache and fall back to the store on a miss
//! - change notifications and `clear` are the only ways cached state is
//!   dropped
//!
//! Concurrent `save`s of one id from different processes are
//! last-write-wins at the store; neither side sees the other's write until
//! notified.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use crossbeam::channel::Receiver;
use crate::{Error, Result};
use crate::cache::{CacheStats, CachedObject, ObjectCache};
use crate::catalog::default_registry;
use crate::config::{ensure_db_dir, ConfigDbConfig};
use crate::info::Info;
use crate::listener::{spawn_bridge, CacheInvalidator, ChangeEvent, ChangeListener, ChangeListenerRegistry};
use crate::mapper::{CodecRegistry, EncodedObject};
use crate::proxy::{Proxy, Resolver};
use crate::storage::SqliteStore;

struct Shared {
    store: SqliteStore,
    codecs: CodecRegistry,
    cache: Arc<ObjectCache>,
    disposed: AtomicBool,
    listening: AtomicBool,
}

impl Shared {
    fn ensure_open(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    /// Cached entity for an id, loading and decoding it on a miss
    fn load(&self, id: &str) -> Result<CachedObject> {
        self.cache.get_or_load(id, || {
            let row = self.store.select_by_id(id)?;
            let value = self.codecs.decode(&row)?;
            tracing::debug!("Loaded {} {} from store", row.type_name, row.id);
            Ok(CachedObject::new(row, value))
        })
    }

    /// Decode what was just written, giving a fresh instance
    fn decode_written(&self, encoded: EncodedObject) -> Result<CachedObject> {
        let row = encoded.to_row();
        let value = self.codecs.decode(&row)?;
        Ok(CachedObject::new(row, value))
    }
}

impl Resolver for Shared {
    fn resolve(&self, id: &str) -> Result<CachedObject> {
        self.ensure_open()?;
        self.load(id)
    }
}

/// Cached, notification-invalidated object store.
///
/// Cheap to clone; clones share the cache and the connection pool.
#[derive(Clone)]
pub struct ConfigDatabase {
    shared: Arc<Shared>,
}

impl ConfigDatabase {
    /// Wrap a store with the given codecs
    pub fn new(store: SqliteStore, codecs: CodecRegistry) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                codecs,
                cache: Arc::new(ObjectCache::new()),
                disposed: AtomicBool::new(false),
                listening: AtomicBool::new(false),
            }),
        }
    }

    /// Open a database file with the built-in catalog types
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(SqliteStore::open(path)?, default_registry()))
    }

    /// Open an in-memory database with the built-in catalog types
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(SqliteStore::open_in_memory()?, default_registry()))
    }

    /// Open the database a config file describes, relative to `base`
    pub fn with_config(config: &ConfigDbConfig, base: &Path, codecs: CodecRegistry) -> Result<Self> {
        let path = config.database_path(base);
        ensure_db_dir(&path)?;
        tracing::info!("Opening configuration database {}", path.display());
        let store = SqliteStore::open_with(&path, config.max_connections(), config.init_db())?;
        Ok(Self::new(store, codecs))
    }

    fn proxy<T: Info>(&self, object: CachedObject) -> Result<Proxy<T>> {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let resolver: Weak<dyn Resolver> = shared;
        Proxy::from_cached(object, resolver)
    }

    // ========== Facade Operations ==========

    /// Insert a new entity.
    ///
    /// Fails with `MissingId` (before any I/O) if the id is unset and with
    /// `DuplicateId` if the id is taken.
    pub fn add<T: Info>(&self, info: &T) -> Result<Proxy<T>> {
        self.shared.ensure_open()?;
        let encoded = self.shared.codecs.encode(info)?;
        self.shared.store.insert(&encoded)?;

        let object = self.shared.decode_written(encoded)?;
        self.shared.cache.put(object.clone());
        self.shared.cache.invalidate_listing(T::TYPE_NAME);
        tracing::debug!("Added {} {}", T::TYPE_NAME, object.id());
        self.proxy(object)
    }

    /// Overwrite an existing entity.
    ///
    /// `info` is left untouched; the result is a new instance decoded from
    /// what was written, equal to `info` by value.
    pub fn save<T: Info>(&self, info: &T) -> Result<Proxy<T>> {
        self.shared.ensure_open()?;
        let encoded = self.shared.codecs.encode(info)?;
        self.shared.store.update(&encoded)?;

        let object = self.shared.decode_written(encoded)?;
        self.shared.cache.put(object.clone());
        tracing::debug!("Saved {} {}", T::TYPE_NAME, object.id());
        self.proxy(object)
    }

    /// Get an entity by id, from the cache if present
    pub fn get_by_id<T: Info>(&self, id: &str) -> Result<Proxy<T>> {
        self.shared.ensure_open()?;
        self.shared.codecs.require::<T>()?;
        let object = self.shared.load(id)?;
        self.proxy(object)
    }

    /// All entities of type `T`.
    ///
    /// The id listing is cached separately from the entities; each id is
    /// resolved through `get_by_id` as the iterator advances.
    pub fn get_all<T: Info>(&self) -> Result<AllOf<T>> {
        self.shared.ensure_open()?;
        self.shared.codecs.require::<T>()?;
        let ids = self
            .shared
            .cache
            .load_listing(T::TYPE_NAME, || self.shared.store.select_ids_by_type(T::TYPE_NAME))?;
        Ok(AllOf {
            db: self.clone(),
            ids,
            next: 0,
            _type: PhantomData,
        })
    }

    /// Entities of type `T` whose indexed `property` equals `value`
    pub fn find_by_property<T: Info>(&self, property: &str, value: &str) -> Result<Vec<Proxy<T>>> {
        self.shared.ensure_open()?;
        self.shared.codecs.require::<T>()?;
        let ids = self
            .shared
            .store
            .select_by_type_and_property(T::TYPE_NAME, property, value)?;

        let mut found = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.get_by_id::<T>(id) {
                Ok(proxy) => found.push(proxy),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }

    /// Delete an entity and its property rows, evicting it from the cache
    pub fn remove(&self, id: &str) -> Result<()> {
        self.shared.ensure_open()?;
        let row = self.shared.store.select_by_id(id)?;
        self.shared.store.delete_by_id(id)?;
        self.shared.cache.invalidate(id);
        self.shared.cache.invalidate_listing(&row.type_name);
        tracing::debug!("Removed {} {}", row.type_name, id);
        Ok(())
    }

    /// Evict one entity from the cache; the next read reloads it
    pub fn clear(&self, id: &str) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.cache.invalidate(id);
        Ok(())
    }

    /// Evict everything from the cache
    pub fn clear_all(&self) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.cache.invalidate_all();
        Ok(())
    }

    /// Release connections and drop all cached state. Idempotent; every
    /// later call on this database (or its clones and proxies) fails with
    /// `Disposed`.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.cache.invalidate_all();
        self.shared.store.close();
        tracing::info!("Configuration database disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    // ========== Change Notifications ==========

    /// A listener that evicts from this database's cache
    pub fn listener(&self) -> Arc<dyn ChangeListener> {
        Arc::new(CacheInvalidator::new(&self.shared.cache))
    }

    /// Register with the host's listener registry. Only the first call
    /// registers; later calls are no-ops.
    pub fn set_host(&self, host: &dyn ChangeListenerRegistry) -> Result<()> {
        self.shared.ensure_open()?;
        if self.shared.listening.swap(true, Ordering::SeqCst) {
            tracing::debug!("Change listener already registered");
            return Ok(());
        }
        host.add_listener(self.listener());
        tracing::info!("Registered change listener with host");
        Ok(())
    }

    /// Apply events from a channel on a background thread. The thread ends
    /// once every sender is dropped.
    pub fn subscribe(&self, events: Receiver<ChangeEvent>) -> Result<JoinHandle<()>> {
        self.shared.ensure_open()?;
        Ok(spawn_bridge(events, self.listener())?)
    }

    // ========== Introspection ==========

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.stats()
    }

    pub fn store(&self) -> &SqliteStore {
        &self.shared.store
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.shared.codecs
    }
}

/// Lazily resolved listing returned by `get_all`.
///
/// Ids whose rows were deleted after the listing was cached are skipped.
pub struct AllOf<T> {
    db: ConfigDatabase,
    ids: Arc<Vec<String>>,
    next: usize,
    _type: PhantomData<fn() -> T>,
}

impl<T> AllOf<T> {
    /// The listed ids, in store order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

impl<T: Info> Iterator for AllOf<T> {
    type Item = Result<Proxy<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.ids.get(self.next) {
            self.next += 1;
            match self.db.get_by_id::<T>(id) {
                Err(e) if e.is_not_found() => {
                    tracing::debug!("Listed {} {} no longer exists", T::TYPE_NAME, id);
                    continue;
                }
                other => return Some(other),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ids.len() - self.next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;
    use rusqlite::Connection;
    use tempfile::TempDir;
    use crate::catalog::{DataStoreInfo, ServiceInfo, WorkspaceInfo};
    use crate::info::InfoRef;

    /// Stands in for the hosting server's listener registry
    #[derive(Default)]
    struct HostStub {
        listeners: Mutex<Vec<Arc<dyn ChangeListener>>>,
    }

    impl ChangeListenerRegistry for HostStub {
        fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
            self.listeners.lock().unwrap().push(listener);
        }
    }

    impl HostStub {
        fn listeners(&self) -> Vec<Arc<dyn ChangeListener>> {
            self.listeners.lock().unwrap().clone()
        }

        fn fire(&self, event: ChangeEvent) {
            for listener in self.listeners() {
                listener.handle_change(&event);
            }
        }
    }

    struct Fixture {
        dir: TempDir,
        db: ConfigDatabase,
        host: HostStub,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = ConfigDatabase::open(&dir.path().join("config.db")).unwrap();
            let host = HostStub::default();
            db.set_host(&host).unwrap();
            Self { dir, db, host }
        }

        /// Another server process pointed at the same store
        fn sibling(&self) -> ConfigDatabase {
            ConfigDatabase::open(&self.dir.path().join("config.db")).unwrap()
        }

        /// Raw connection for writing behind the engine's back
        fn raw(&self) -> Connection {
            Connection::open(self.dir.path().join("config.db")).unwrap()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.db.dispose();
        }
    }

    fn add_workspace(db: &ConfigDatabase) -> Proxy<WorkspaceInfo> {
        db.add(&WorkspaceInfo::new("wsid", "ws1")).unwrap()
    }

    fn assert_saved<T: Info + PartialEq + std::fmt::Debug>(db: &ConfigDatabase, info: &T) -> Proxy<T> {
        let saved = db.save(info).unwrap();
        assert!(!std::ptr::eq(&*saved, info));
        assert_eq!(saved, *info);
        saved
    }

    #[test]
    fn test_add() {
        let fx = Fixture::new();

        let mut ws = WorkspaceInfo::default();
        let err = fx.db.add(&ws).unwrap_err();
        assert!(matches!(err, Error::MissingId));
        assert!(err.is_precondition());
        assert_eq!(err.to_string(), "Object has no id");
        assert_eq!(fx.db.store().stats().unwrap().objects, 0);

        ws.id = Some("wsid".into());
        ws.name = Some("ws1".into());
        let added = fx.db.add(&ws).unwrap();
        assert_eq!(added, ws);
        assert!(!std::ptr::eq(&*added, &ws));

        let ds = DataStoreInfo::new("ds1", "data store one")
            .in_workspace(InfoRef::to(&ws).unwrap())
            .with_param("param1", "value1")
            .with_param("param2", "value2");
        let added_ds = fx.db.add(&ds).unwrap();
        assert_eq!(added_ds, ds);
    }

    #[test]
    fn test_add_duplicate_id() {
        let fx = Fixture::new();
        add_workspace(&fx.db);
        let err = fx.db.add(&WorkspaceInfo::new("wsid", "other")).unwrap_err();
        assert!(matches!(err, Error::DuplicateId(_)));
        assert_eq!(fx.db.get_by_id::<WorkspaceInfo>("wsid").unwrap().name.as_deref(), Some("ws1"));
    }

    #[test]
    fn test_round_trip_through_store() {
        let fx = Fixture::new();
        let ds = DataStoreInfo::new("ds1", "store").with_param("url", "file:data");
        let added = fx.db.add(&ds).unwrap();

        fx.db.clear(added.id()).unwrap();
        let loaded = fx.db.get_by_id::<DataStoreInfo>("ds1").unwrap();
        assert_eq!(loaded, ds);
        assert_eq!(loaded, added);
        assert!(!Proxy::ptr_eq(&loaded, &added));
    }

    #[test]
    fn test_modify_workspace() {
        let fx = Fixture::new();
        let added = add_workspace(&fx.db);
        let mut ws = added.to_info();
        ws.name = Some("newName".into());

        let saved = assert_saved(&fx.db, &ws);
        assert_ne!(saved, added);
        assert_eq!(added.name.as_deref(), Some("ws1"));
        assert_eq!(fx.db.get_by_id::<WorkspaceInfo>("wsid").unwrap(), saved);
    }

    #[test]
    fn test_modify_data_store_keeps_reference() {
        let fx = Fixture::new();
        let ws = add_workspace(&fx.db);
        let ds = DataStoreInfo::new("ds1", "store").in_workspace(InfoRef::new(ws.id()));
        let mut ds = fx.db.add(&ds).unwrap().to_info();
        ds.enabled = true;

        let saved = assert_saved(&fx.db, &ds);
        assert_eq!(saved.workspace, ds.workspace);
    }

    #[test]
    fn test_modify_service() {
        let fx = Fixture::new();
        let service = fx.db.add(&ServiceInfo::new("WMS-TEST", "WMS").with_maintainer("Foo")).unwrap();
        assert_eq!(service.maintainer.as_deref(), Some("Foo"));

        let mut service = service.to_info();
        service.maintainer = Some("Bar".into());
        assert_saved(&fx.db, &service);
    }

    #[test]
    fn test_save_preconditions() {
        let fx = Fixture::new();
        assert!(matches!(fx.db.save(&WorkspaceInfo::default()), Err(Error::MissingId)));
        assert!(fx.db.save(&WorkspaceInfo::new("ghost", "x")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_cache_catalog() {
        // Simulates several servers sharing one database
        let fx = Fixture::new();
        let mut ws = add_workspace(&fx.db).to_info();
        ws.name = Some("name1".into());
        assert_saved(&fx.db, &ws);

        let conn = fx.raw();
        assert_eq!(
            conn.execute(
                "UPDATE object_property SET value='name2' WHERE property_type=(SELECT oid FROM property_type WHERE type_id = (SELECT oid FROM type WHERE typename='workspace') AND name='name') AND id = 'wsid'",
                [],
            )
            .unwrap(),
            1
        );
        assert_eq!(
            conn.execute(
                r#"UPDATE object SET blob=(SELECT replace(blob, '"name":"name1"', '"name":"name2"') FROM object WHERE id = 'wsid') WHERE id = 'wsid'"#,
                [],
            )
            .unwrap(),
            1
        );
        drop(conn);

        // Should be cached
        let ws2 = fx.db.get_by_id::<WorkspaceInfo>("wsid").unwrap();
        assert_eq!(ws2.name.as_deref(), Some("name1"));

        fx.host.fire(ChangeEvent::modified(ws2.id(), "workspace"));

        let ws3 = fx.db.get_by_id::<WorkspaceInfo>("wsid").unwrap();
        assert_eq!(ws3.name.as_deref(), Some("name2"));
        // the old handle is still usable and compares by state
        assert_ne!(ws2, ws3);
        assert_eq!(fx.db.find_by_property::<WorkspaceInfo>("name", "name2").unwrap(), vec![ws3]);
    }

    #[test]
    fn test_cache_config() {
        let fx = Fixture::new();
        let service = fx.db.add(&ServiceInfo::new("WMS-TEST", "WMS").with_maintainer("Foo")).unwrap();
        assert_eq!(service.maintainer.as_deref(), Some("Foo"));

        let conn = fx.raw();
        assert_eq!(
            conn.execute(
                r#"UPDATE object SET blob=(SELECT replace(blob, '"maintainer":"Foo"', '"maintainer":"Bar"') FROM object WHERE id = 'WMS-TEST') WHERE id = 'WMS-TEST'"#,
                [],
            )
            .unwrap(),
            1
        );
        drop(conn);

        let service = fx.db.get_by_id::<ServiceInfo>("WMS-TEST").unwrap();
        assert_eq!(service.maintainer.as_deref(), Some("Foo"));

        for listener in fx.host.listeners() {
            listener.handle_change(&ChangeEvent::modified(service.id(), "service"));
        }

        let service = fx.db.get_by_id::<ServiceInfo>("WMS-TEST").unwrap();
        assert_eq!(service.maintainer.as_deref(), Some("Bar"));
    }

    #[test]
    fn test_sibling_write_needs_notification() {
        let fx = Fixture::new();
        let sibling = fx.sibling();
        add_workspace(&fx.db);

        let mut ws = sibling.get_by_id::<WorkspaceInfo>("wsid").unwrap().to_info();
        ws.name = Some("renamed".into());
        sibling.save(&ws).unwrap();

        assert_eq!(fx.db.get_by_id::<WorkspaceInfo>("wsid").unwrap().name.as_deref(), Some("ws1"));
        fx.db.clear("wsid").unwrap();
        assert_eq!(fx.db.get_by_id::<WorkspaceInfo>("wsid").unwrap().name.as_deref(), Some("renamed"));
        sibling.dispose();
    }

    #[test]
    fn test_reference_resolves_through_cache() {
        let fx = Fixture::new();
        let ws = add_workspace(&fx.db);
        let ds = fx
            .db
            .add(&DataStoreInfo::new("ds1", "store").in_workspace(InfoRef::new(ws.id())))
            .unwrap();

        let mut renamed = ws.to_info();
        renamed.name = Some("ws-renamed".into());
        fx.db.save(&renamed).unwrap();

        // the data store was decoded before the rename and still sees it
        let resolved = ds.resolve_opt(ds.workspace.as_ref()).unwrap().unwrap();
        assert_eq!(resolved.name.as_deref(), Some("ws-renamed"));
    }

    #[test]
    fn test_get_all_listing_cache() {
        let fx = Fixture::new();
        let sibling = fx.sibling();
        fx.db.add(&WorkspaceInfo::new("ws-a", "a")).unwrap();
        fx.db.add(&WorkspaceInfo::new("ws-b", "b")).unwrap();

        let first: HashSet<String> = fx.db.get_all::<WorkspaceInfo>().unwrap().ids().iter().cloned().collect();
        let second: HashSet<String> = fx.db.get_all::<WorkspaceInfo>().unwrap().ids().iter().cloned().collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);

        sibling.add(&WorkspaceInfo::new("ws-c", "c")).unwrap();
        assert_eq!(fx.db.get_all::<WorkspaceInfo>().unwrap().ids().len(), 2);

        fx.host.fire(ChangeEvent::added("ws-c", "workspace"));
        let all: Vec<_> = fx
            .db
            .get_all::<WorkspaceInfo>()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].name.as_deref(), Some("c"));
        sibling.dispose();
    }

    #[test]
    fn test_get_all_skips_vanished_ids() {
        let fx = Fixture::new();
        let sibling = fx.sibling();
        fx.db.add(&WorkspaceInfo::new("ws-a", "a")).unwrap();
        fx.db.add(&WorkspaceInfo::new("ws-b", "b")).unwrap();
        assert_eq!(fx.db.get_all::<WorkspaceInfo>().unwrap().count(), 2);

        sibling.remove("ws-a").unwrap();
        // the entity notification arrived, the listing one did not
        fx.host.fire(ChangeEvent::modified("ws-a", "workspace"));

        let all = fx.db.get_all::<WorkspaceInfo>().unwrap();
        assert_eq!(all.ids().len(), 2);
        let names: Vec<_> = all.map(|p| p.unwrap().name.clone().unwrap()).collect();
        assert_eq!(names, vec!["b".to_string()]);
        sibling.dispose();
    }

    #[test]
    fn test_remove() {
        let fx = Fixture::new();
        add_workspace(&fx.db);
        assert_eq!(fx.db.get_all::<WorkspaceInfo>().unwrap().count(), 1);

        fx.db.remove("wsid").unwrap();
        assert!(fx.db.get_by_id::<WorkspaceInfo>("wsid").unwrap_err().is_not_found());
        assert_eq!(fx.db.get_all::<WorkspaceInfo>().unwrap().count(), 0);
        assert_eq!(fx.db.store().stats().unwrap().properties, 0);
        assert!(fx.db.remove("wsid").unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_by_id_errors() {
        let fx = Fixture::new();
        add_workspace(&fx.db);
        assert!(fx.db.get_by_id::<WorkspaceInfo>("missing").unwrap_err().is_not_found());
        assert!(matches!(
            fx.db.get_by_id::<ServiceInfo>("wsid"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_find_by_property() {
        let fx = Fixture::new();
        let ws = add_workspace(&fx.db);
        for (id, enabled) in [("ds1", true), ("ds2", false), ("ds3", true)] {
            let mut ds = DataStoreInfo::new(id, id).in_workspace(InfoRef::new(ws.id()));
            ds.enabled = enabled;
            fx.db.add(&ds).unwrap();
        }

        let enabled = fx.db.find_by_property::<DataStoreInfo>("enabled", "true").unwrap();
        let ids: Vec<_> = enabled.iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["ds1".to_string(), "ds3".to_string()]);

        assert_eq!(fx.db.find_by_property::<DataStoreInfo>("workspace", "wsid").unwrap().len(), 3);
        assert!(fx
            .db
            .find_by_property::<DataStoreInfo>("description", "x")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_dispose() {
        let fx = Fixture::new();
        let ws = add_workspace(&fx.db);
        fx.db.dispose();
        fx.db.dispose();
        assert!(fx.db.is_disposed());

        assert!(matches!(fx.db.add(&WorkspaceInfo::new("x", "x")), Err(Error::Disposed)));
        assert!(matches!(fx.db.save(&ws.to_info()), Err(Error::Disposed)));
        assert!(matches!(fx.db.get_by_id::<WorkspaceInfo>("wsid"), Err(Error::Disposed)));
        assert!(matches!(fx.db.get_all::<WorkspaceInfo>(), Err(Error::Disposed)));
        assert!(matches!(fx.db.clear("wsid"), Err(Error::Disposed)));
        assert!(matches!(fx.db.remove("wsid"), Err(Error::Disposed)));
        assert!(matches!(ws.resolve(&InfoRef::<WorkspaceInfo>::new("wsid")), Err(Error::Disposed)));
        assert_eq!(fx.db.cache_stats().entries, 0);

        // late notifications are harmless
        fx.host.fire(ChangeEvent::Reloaded);
    }

    #[test]
    fn test_set_host_registers_once() {
        let fx = Fixture::new();
        fx.db.set_host(&fx.host).unwrap();
        assert_eq!(fx.host.listeners().len(), 1);
    }

    #[test]
    fn test_subscribe_channel() {
        let fx = Fixture::new();
        add_workspace(&fx.db);
        let conn = fx.raw();
        conn.execute(
            r#"UPDATE object SET blob = replace(blob, '"name":"ws1"', '"name":"ws9"') WHERE id = 'wsid'"#,
            [],
        )
        .unwrap();

        let (tx, rx) = crossbeam::channel::unbounded();
        let bridge = fx.db.subscribe(rx).unwrap();
        tx.send(ChangeEvent::modified("wsid", "workspace")).unwrap();
        drop(tx);
        bridge.join().unwrap();

        assert_eq!(fx.db.get_by_id::<WorkspaceInfo>("wsid").unwrap().name.as_deref(), Some("ws9"));
    }

    #[test]
    fn test_concurrent_readers() {
        let fx = Fixture::new();
        for i in 0..10 {
            fx.db.add(&WorkspaceInfo::new(format!("ws{}", i), format!("name{}", i))).unwrap();
        }
        fx.db.clear_all().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let db = fx.db.clone();
                thread::spawn(move || {
                    for n in 0..100 {
                        let i = (t + n) % 10;
                        let ws = db.get_by_id::<WorkspaceInfo>(&format!("ws{}", i)).unwrap();
                        assert_eq!(ws.name.as_deref(), Some(format!("name{}", i).as_str()));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = fx.db.cache_stats();
        assert_eq!(stats.entries, 10);
        assert_eq!(stats.loads, 10);
    }

    #[test]
    fn test_concurrent_writers() {
        let fx = Fixture::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let db = fx.db.clone();
                thread::spawn(move || -> Result<()> {
                    let id = format!("ws{}", t);
                    let mut ws = db.add(&WorkspaceInfo::new(id.as_str(), format!("t{}-0", t)))?.to_info();
                    for n in 1..=25 {
                        ws.name = Some(format!("t{}-{}", t, n));
                        db.save(&ws)?;
                    }
                    Ok(())
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        fx.db.clear_all().unwrap();
        for t in 0..8 {
            let expected = format!("t{}-25", t);
            let ws = fx.db.get_by_id::<WorkspaceInfo>(&format!("ws{}", t)).unwrap();
            assert_eq!(ws.name.as_deref(), Some(expected.as_str()));
            let found = fx.db.find_by_property::<WorkspaceInfo>("name", &expected).unwrap();
            assert_eq!(found, vec![ws]);
        }
        assert_eq!(fx.db.get_all::<WorkspaceInfo>().unwrap().count(), 8);
        assert_eq!(fx.db.store().stats().unwrap().properties, 8);
    }

    #[test]
    fn test_concurrent_add_same_id() {
        let fx = Fixture::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let db = fx.db.clone();
                thread::spawn(move || db.add(&WorkspaceInfo::new("shared", format!("w{}", t))).map(|_| ()))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Error::DuplicateId(_))));
        assert_eq!(fx.db.store().stats().unwrap().objects, 1);
    }

    #[test]
    fn test_get_service_with_workspace_ref() {
        let fx = Fixture::new();
        let ws = add_workspace(&fx.db);
        let mut service = ServiceInfo::new("WMS-TEST", "WMS");
        service.workspace = Some(InfoRef::new(ws.id()));
        let added = fx.db.add(&service).unwrap();
        fx.db.clear(added.id()).unwrap();

        let service = fx.db.get_all::<ServiceInfo>().unwrap().next().unwrap().unwrap();
        assert_eq!(service, added);
        let workspace = service.resolve_opt(service.workspace.as_ref()).unwrap().unwrap();
        assert_eq!(workspace, ws);
        assert_eq!(workspace.name.as_deref(), Some("ws1"));
    }

    #[test]
    fn test_in_memory_database() {
        let db = ConfigDatabase::open_in_memory().unwrap();
        let ws = add_workspace(&db);
        assert_eq!(db.get_by_id::<WorkspaceInfo>(ws.id()).unwrap(), ws);
        db.dispose();
    }
}
