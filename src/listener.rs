//! Change notification bridge
//!
//! Other processes sharing the backing store write behind this process's
//! back. The host application learns about those writes its own way and
//! reports them here as `ChangeEvent`s; the only reaction is cache
//! eviction. Nothing in this module reads the store or looks at time.
//!
//! Two delivery styles are supported:
//! - callbacks: the host keeps a `ChangeListenerRegistry` and invokes every
//!   registered `ChangeListener`
//! - messages: the host owns a `crossbeam` sender and the engine drains the
//!   receiving end on a bridge thread

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use crossbeam::channel::Receiver;
use serde::{Deserialize, Serialize};
use crate::cache::ObjectCache;

/// Something changed in the backing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    Added { id: String, type_name: String },
    Modified { id: String, type_name: String },
    Removed { id: String, type_name: String },
    /// Any entity of the type may have changed
    TypeChanged { type_name: String },
    /// Everything may have changed
    Reloaded,
}

impl ChangeEvent {
    pub fn added(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        ChangeEvent::Added { id: id.into(), type_name: type_name.into() }
    }

    pub fn modified(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        ChangeEvent::Modified { id: id.into(), type_name: type_name.into() }
    }

    pub fn removed(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        ChangeEvent::Removed { id: id.into(), type_name: type_name.into() }
    }

    pub fn type_changed(type_name: impl Into<String>) -> Self {
        ChangeEvent::TypeChanged { type_name: type_name.into() }
    }

    /// Id of the entity this event names, if it names one
    pub fn id(&self) -> Option<&str> {
        match self {
            ChangeEvent::Added { id, .. }
            | ChangeEvent::Modified { id, .. }
            | ChangeEvent::Removed { id, .. } => Some(id),
            ChangeEvent::TypeChanged { .. } | ChangeEvent::Reloaded => None,
        }
    }
}

/// Receives change events from the host
pub trait ChangeListener: Send + Sync {
    fn handle_change(&self, event: &ChangeEvent);
}

/// The host's listener registry
pub trait ChangeListenerRegistry {
    fn add_listener(&self, listener: Arc<dyn ChangeListener>);
}

/// Apply one event to a cache
pub fn evict(cache: &ObjectCache, event: &ChangeEvent) {
    tracing::debug!("Change notification: {:?}", event);
    match event {
        ChangeEvent::Modified { id, .. } => {
            cache.invalidate(id);
        }
        ChangeEvent::Added { id, type_name } | ChangeEvent::Removed { id, type_name } => {
            cache.invalidate(id);
            cache.invalidate_listing(type_name);
        }
        ChangeEvent::TypeChanged { type_name } => cache.invalidate_type(type_name),
        ChangeEvent::Reloaded => cache.invalidate_all(),
    }
}

/// Listener registered with the host on behalf of one database.
///
/// Holds the cache weakly: once the database is gone, events are dropped.
pub struct CacheInvalidator {
    cache: Weak<ObjectCache>,
}

impl CacheInvalidator {
    pub fn new(cache: &Arc<ObjectCache>) -> Self {
        Self {
            cache: Arc::downgrade(cache),
        }
    }
}

impl ChangeListener for CacheInvalidator {
    fn handle_change(&self, event: &ChangeEvent) {
        match self.cache.upgrade() {
            Some(cache) => evict(&cache, event),
            None => tracing::debug!("Ignoring {:?}, database disposed", event),
        }
    }
}

/// Drain `events` into `listener` on a dedicated thread until every sender
/// is dropped.
pub fn spawn_bridge(
    events: Receiver<ChangeEvent>,
    listener: Arc<dyn ChangeListener>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("configdb-notify".to_string())
        .spawn(move || {
            for event in events.iter() {
                listener.handle_change(&event);
            }
            tracing::debug!("Change channel closed, bridge exiting");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedObject;
    use crate::storage::ObjectRow;

    fn cached(id: &str, type_name: &str) -> CachedObject {
        CachedObject::new(
            ObjectRow {
                id: id.to_string(),
                type_name: type_name.to_string(),
                blob: "{}".to_string(),
            },
            Arc::new(()),
        )
    }

    fn primed() -> Arc<ObjectCache> {
        let cache = Arc::new(ObjectCache::new());
        cache.put(cached("ws1", "workspace"));
        cache.put(cached("ws2", "workspace"));
        cache.put(cached("svc", "service"));
        cache.put_listing("workspace", vec!["ws1".into(), "ws2".into()]);
        cache.put_listing("service", vec!["svc".into()]);
        cache
    }

    #[test]
    fn test_modified_evicts_only_the_entity() {
        let cache = primed();
        evict(&cache, &ChangeEvent::modified("ws1", "workspace"));
        assert!(cache.get("ws1").is_none());
        assert!(cache.get("ws2").is_some());
        assert!(cache.listing("workspace").is_some());
    }

    #[test]
    fn test_added_and_removed_evict_listing() {
        let cache = primed();
        evict(&cache, &ChangeEvent::removed("ws1", "workspace"));
        assert!(cache.get("ws1").is_none());
        assert!(cache.listing("workspace").is_none());
        assert!(cache.listing("service").is_some());

        evict(&cache, &ChangeEvent::added("svc2", "service"));
        assert!(cache.listing("service").is_none());
        assert!(cache.get("svc").is_some());
    }

    #[test]
    fn test_type_and_global_events() {
        let cache = primed();
        evict(&cache, &ChangeEvent::type_changed("workspace"));
        assert!(cache.get("ws1").is_none() && cache.get("ws2").is_none());
        assert!(cache.get("svc").is_some());

        evict(&cache, &ChangeEvent::Reloaded);
        assert!(cache.is_empty());
        assert!(cache.listing("service").is_none());
    }

    #[test]
    fn test_duplicate_events_are_harmless() {
        let cache = primed();
        let event = ChangeEvent::modified("ws1", "workspace");
        evict(&cache, &event);
        evict(&cache, &event);
        assert!(cache.get("ws1").is_none());
        assert!(cache.get("ws2").is_some());
    }

    #[test]
    fn test_invalidator_outlived_by_host() {
        let cache = primed();
        let listener = CacheInvalidator::new(&cache);
        drop(cache);
        // no cache left to evict from; must not panic
        listener.handle_change(&ChangeEvent::Reloaded);
    }

    #[test]
    fn test_bridge_thread_drains_channel() {
        let cache = primed();
        let (tx, rx) = crossbeam::channel::unbounded();
        let handle = spawn_bridge(rx, Arc::new(CacheInvalidator::new(&cache))).unwrap();

        tx.send(ChangeEvent::modified("ws2", "workspace")).unwrap();
        drop(tx);
        handle.join().unwrap();

        assert!(cache.get("ws2").is_none());
        assert!(cache.get("ws1").is_some());
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&ChangeEvent::modified("wsid", "workspace")).unwrap();
        assert_eq!(json, r#"{"event":"modified","id":"wsid","type_name":"workspace"}"#);
        assert_eq!(ChangeEvent::Reloaded.id(), None);
    }
}
