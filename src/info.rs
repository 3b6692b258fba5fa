//! Entity contract - what a type must provide to be stored
//!
//! Every persisted entity:
//! - carries a caller-assigned string id (unset until the caller sets it)
//! - declares a stable type tag stored alongside its blob
//! - lists the top-level attributes worth indexing for point lookups
//!
//! Fields that point at other entities are stored as `InfoRef<T>`, which
//! holds only the target id and is resolved through the cache on read.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A persistable configuration entity.
///
/// The serialized form must be a JSON object; its top-level scalar
/// attributes become property definitions of the type.
pub trait Info: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Type tag written to the `type` table and next to every blob
    const TYPE_NAME: &'static str;

    /// Top-level attributes copied into `object_property` rows
    const INDEXED: &'static [&'static str] = &[];

    /// The caller-assigned id, `None` while unset
    fn id(&self) -> Option<&str>;
}

/// Reference to another entity by id.
///
/// Serializes as the bare id string, so the referencing blob never embeds a
/// copy of the target and the reference can be indexed like any scalar.
pub struct InfoRef<T> {
    id: String,
    _target: PhantomData<fn() -> T>,
}

impl<T> InfoRef<T> {
    /// Create a reference to the entity with the given id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            _target: PhantomData,
        }
    }

    /// Id of the referenced entity
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T: Info> InfoRef<T> {
    /// Reference an entity that already has an id
    pub fn to(target: &T) -> crate::Result<Self> {
        target.id().map(Self::new).ok_or(crate::Error::MissingId)
    }
}

impl<T> Clone for InfoRef<T> {
    fn clone(&self) -> Self {
        Self::new(self.id.clone())
    }
}

impl<T> PartialEq for InfoRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for InfoRef<T> {}

impl<T> Hash for InfoRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for InfoRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoRef({})", self.id)
    }
}

impl<T> fmt::Display for InfoRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl<T> Serialize for InfoRef<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id)
    }
}

impl<'de, T> Deserialize<'de> for InfoRef<T> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = String::deserialize(deserializer)?;
        if id.is_empty() {
            return Err(serde::de::Error::custom("reference id must not be empty"));
        }
        Ok(InfoRef::new(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::WorkspaceInfo;

    #[test]
    fn test_ref_serializes_as_id() {
        let r: InfoRef<WorkspaceInfo> = InfoRef::new("wsid");
        assert_eq!(serde_json::to_string(&r).unwrap(), "\"wsid\"");

        let parsed: InfoRef<WorkspaceInfo> = serde_json::from_str("\"wsid\"").unwrap();
        assert_eq!(parsed, r);
    }

    #[test]
    fn test_ref_rejects_empty_id() {
        assert!(serde_json::from_str::<InfoRef<WorkspaceInfo>>("\"\"").is_err());
    }

    #[test]
    fn test_ref_to_requires_id() {
        let ws = WorkspaceInfo::default();
        assert!(matches!(InfoRef::to(&ws), Err(crate::Error::MissingId)));

        let ws = WorkspaceInfo::new("wsid", "ws1");
        assert_eq!(InfoRef::to(&ws).unwrap().id(), "wsid");
    }
}
