//! Entity handles returned to callers
//!
//! A `Proxy<T>` wraps one decoded instance together with the row it was
//! decoded from. Reading fields goes through `Deref`; reading a field that
//! points at another entity goes through `resolve`, which looks the target
//! up by id in the cache instead of trusting a copy captured at decode time.
//!
//! Equality is persisted-state equality: two proxies are equal when they
//! carry the same id and the same blob, whichever instance they wrap.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Weak};
use crate::{Error, Result};
use crate::cache::CachedObject;
use crate::info::{Info, InfoRef};
use crate::mapper::downcast;
use crate::storage::ObjectRow;

/// Looks entities up by id on behalf of proxies
pub trait Resolver: Send + Sync {
    fn resolve(&self, id: &str) -> Result<CachedObject>;
}

/// Handle to a decoded entity
pub struct Proxy<T> {
    row: Arc<ObjectRow>,
    value: Arc<T>,
    resolver: Weak<dyn Resolver>,
}

impl<T: Info> Proxy<T> {
    pub(crate) fn from_cached(object: CachedObject, resolver: Weak<dyn Resolver>) -> Result<Self> {
        let value = downcast::<T>(&object.row.id, &object.row.type_name, object.value)?;
        Ok(Self {
            row: object.row,
            value,
            resolver,
        })
    }

    pub fn id(&self) -> &str {
        &self.row.id
    }

    pub fn type_name(&self) -> &str {
        &self.row.type_name
    }

    /// The persisted state this instance was decoded from
    pub fn blob(&self) -> &str {
        &self.row.blob
    }

    /// A detached copy to modify and hand back to `save`
    pub fn to_info(&self) -> T {
        (*self.value).clone()
    }

    /// True if both handles wrap the very same decoded instance
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.value, &b.value)
    }

    /// Resolve a reference field through the owning database's cache
    pub fn resolve<U: Info>(&self, reference: &InfoRef<U>) -> Result<Proxy<U>> {
        let resolver = self.resolver.upgrade().ok_or(Error::Disposed)?;
        let object = resolver.resolve(reference.id())?;
        Proxy::from_cached(object, self.resolver.clone())
    }

    /// Resolve an optional reference field
    pub fn resolve_opt<U: Info>(&self, reference: Option<&InfoRef<U>>) -> Result<Option<Proxy<U>>> {
        reference.map(|r| self.resolve(r)).transpose()
    }
}

impl<T> Clone for Proxy<T> {
    fn clone(&self) -> Self {
        Self {
            row: Arc::clone(&self.row),
            value: Arc::clone(&self.value),
            resolver: self.resolver.clone(),
        }
    }
}

impl<T> Deref for Proxy<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> PartialEq for Proxy<T> {
    fn eq(&self, other: &Self) -> bool {
        self.row.id == other.row.id && self.row.blob == other.row.blob
    }
}

impl<T> Eq for Proxy<T> {}

impl<T> Hash for Proxy<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.row.id.hash(state);
        self.row.blob.hash(state);
    }
}

/// Compare against a plain (unwrapped) entity by value
impl<T: PartialEq> PartialEq<T> for Proxy<T> {
    fn eq(&self, other: &T) -> bool {
        *self.value == *other
    }
}

impl<T: fmt::Debug> fmt::Debug for Proxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("id", &self.row.id)
            .field("type", &self.row.type_name)
            .field("value", &*self.value)
            .finish()
    }
}
