//! Object mapper - entities to persisted form and back
//!
//! Each entity type gets one codec, registered under its type tag. Encoding
//! produces the JSON blob plus the property definitions found on the
//! entity's top-level scalar attributes; decoding picks the codec by the tag
//! stored next to the blob, so the engine never inspects runtime types.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use serde_json::Value;
use crate::{Error, Result};
use crate::info::Info;
use crate::storage::ObjectRow;

/// Decoded entity as held by the cache, type-erased
pub type AnyInfo = Arc<dyn Any + Send + Sync>;

/// One top-level scalar attribute of an encoded entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    pub name: String,
    /// Whether the attribute is copied into `object_property`
    pub indexed: bool,
    /// Text form of the scalar; `None` for null attributes
    pub value: Option<String>,
}

impl PropertyValue {
    /// True if this property produces an `object_property` row
    pub fn has_row(&self) -> bool {
        self.indexed && self.value.is_some()
    }
}

/// An entity in its persisted form
#[derive(Debug, Clone)]
pub struct EncodedObject {
    pub id: String,
    pub type_name: String,
    pub blob: String,
    pub properties: Vec<PropertyValue>,
}

impl EncodedObject {
    /// The row this object becomes once stored
    pub fn to_row(&self) -> ObjectRow {
        ObjectRow {
            id: self.id.clone(),
            type_name: self.type_name.clone(),
            blob: self.blob.clone(),
        }
    }
}

/// Decoder for a single entity type
pub trait Codec: Send + Sync {
    /// Type tag this codec handles
    fn type_name(&self) -> &'static str;

    /// Attributes indexed for this type
    fn indexed(&self) -> &'static [&'static str];

    /// Decode a blob of this type
    fn decode(&self, blob: &str) -> Result<AnyInfo>;
}

struct InfoCodec<T>(PhantomData<fn() -> T>);

impl<T: Info> Codec for InfoCodec<T> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn indexed(&self) -> &'static [&'static str] {
        T::INDEXED
    }

    fn decode(&self, blob: &str) -> Result<AnyInfo> {
        let info: T = serde_json::from_str(blob)?;
        Ok(Arc::new(info))
    }
}

/// Registry of codecs keyed by type tag
#[derive(Default)]
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Box<dyn Codec>>,
}

impl CodecRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the codec for `T`, replacing any previous one for its tag
    pub fn register<T: Info>(&mut self) {
        self.codecs
            .insert(T::TYPE_NAME, Box::new(InfoCodec::<T>(PhantomData)));
    }

    /// Find the codec for a type tag
    pub fn get(&self, type_name: &str) -> Option<&dyn Codec> {
        self.codecs.get(type_name).map(|c| c.as_ref())
    }

    /// All registered type tags, sorted
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.codecs.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Ensure `T` has a codec
    pub fn require<T: Info>(&self) -> Result<()> {
        if self.codecs.contains_key(T::TYPE_NAME) {
            Ok(())
        } else {
            Err(Error::UnknownType(T::TYPE_NAME.to_string()))
        }
    }

    /// Encode an entity.
    ///
    /// Fails with `MissingId` before touching anything else if the id is
    /// unset or empty. Map-valued attributes must have a stable iteration
    /// order (e.g. `BTreeMap`) for blob equality to mean value equality.
    pub fn encode<T: Info>(&self, info: &T) -> Result<EncodedObject> {
        let id = info
            .id()
            .filter(|id| !id.is_empty())
            .ok_or(Error::MissingId)?;
        self.require::<T>()?;

        let blob = serde_json::to_string(info)?;
        let value = serde_json::to_value(info)?;
        let properties = extract_properties(&value, T::INDEXED)?;

        Ok(EncodedObject {
            id: id.to_string(),
            type_name: T::TYPE_NAME.to_string(),
            blob,
            properties,
        })
    }

    /// Decode a stored row with the codec named by its type tag
    pub fn decode(&self, row: &ObjectRow) -> Result<AnyInfo> {
        let codec = self
            .get(&row.type_name)
            .ok_or_else(|| Error::UnknownType(row.type_name.clone()))?;
        codec.decode(&row.blob)
    }

    /// Decode a stored row as `T`
    pub fn decode_as<T: Info>(&self, row: &ObjectRow) -> Result<Arc<T>> {
        let decoded = self.decode(row)?;
        downcast::<T>(&row.id, &row.type_name, decoded)
    }
}

/// Recover the concrete type of a decoded entity
pub fn downcast<T: Info>(id: &str, stored: &str, decoded: AnyInfo) -> Result<Arc<T>> {
    decoded.downcast::<T>().map_err(|_| Error::TypeMismatch {
        id: id.to_string(),
        stored: stored.to_string(),
        requested: T::TYPE_NAME.to_string(),
    })
}

fn extract_properties(value: &Value, indexed: &[&str]) -> Result<Vec<PropertyValue>> {
    let object = value.as_object().ok_or_else(|| {
        <serde_json::Error as serde::ser::Error>::custom("entity must serialize to a JSON object")
    })?;

    let properties = object
        .iter()
        .filter(|(_, v)| !v.is_array() && !v.is_object())
        .map(|(name, v)| PropertyValue {
            name: name.clone(),
            indexed: indexed.contains(&name.as_str()),
            value: scalar_text(v),
        })
        .collect();

    Ok(properties)
}

/// Text form used for indexed values
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{default_registry, DataStoreInfo, ServiceInfo, WorkspaceInfo};
    use crate::info::InfoRef;

    fn property<'a>(encoded: &'a EncodedObject, name: &str) -> &'a PropertyValue {
        encoded
            .properties
            .iter()
            .find(|p| p.name == name)
            .unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let registry = default_registry();
        let ds = DataStoreInfo::new("ds1", "data store one")
            .in_workspace(InfoRef::new("wsid"))
            .with_param("param1", "value1");

        let encoded = registry.encode(&ds).unwrap();
        assert_eq!(encoded.type_name, "datastore");

        let decoded = registry.decode_as::<DataStoreInfo>(&encoded.to_row()).unwrap();
        assert_eq!(*decoded, ds);
    }

    #[test]
    fn test_indexed_properties() {
        let registry = default_registry();
        let ds = DataStoreInfo::new("ds1", "data store one").in_workspace(InfoRef::new("wsid"));
        let encoded = registry.encode(&ds).unwrap();

        let name = property(&encoded, "name");
        assert!(name.has_row());
        assert_eq!(name.value.as_deref(), Some("data store one"));

        assert_eq!(property(&encoded, "workspace").value.as_deref(), Some("wsid"));
        assert_eq!(property(&encoded, "enabled").value.as_deref(), Some("false"));

        // declared but not indexed
        assert!(!property(&encoded, "description").has_row());
        // maps stay in the blob only
        assert!(encoded.properties.iter().all(|p| p.name != "connection_parameters"));
    }

    #[test]
    fn test_missing_id() {
        let registry = default_registry();
        assert!(matches!(registry.encode(&WorkspaceInfo::default()), Err(Error::MissingId)));

        let mut ws = WorkspaceInfo::new("", "ws1");
        assert!(matches!(registry.encode(&ws), Err(Error::MissingId)));
        ws.id = Some("wsid".into());
        assert!(registry.encode(&ws).is_ok());
    }

    #[test]
    fn test_unknown_type() {
        let registry = CodecRegistry::new();
        let err = registry.encode(&WorkspaceInfo::new("wsid", "ws1")).unwrap_err();
        assert!(matches!(err, Error::UnknownType(t) if t == "workspace"));
    }

    #[test]
    fn test_decode_type_mismatch() {
        let registry = default_registry();
        let encoded = registry.encode(&WorkspaceInfo::new("wsid", "ws1")).unwrap();
        let err = registry.decode_as::<ServiceInfo>(&encoded.to_row()).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }
}
