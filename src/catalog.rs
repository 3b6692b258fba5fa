//! Built-in catalog entities
//!
//! The host application owns its own domain model; these three types are the
//! minimal catalog the CLI and tests work with:
//! - `WorkspaceInfo`: a named grouping of stores and services
//! - `DataStoreInfo`: a connection to a data source inside a workspace
//! - `ServiceInfo`: a published service, optionally scoped to a workspace

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::info::{Info, InfoRef};
use crate::mapper::CodecRegistry;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    pub isolated: bool,
}

impl WorkspaceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            isolated: false,
        }
    }
}

impl Info for WorkspaceInfo {
    const TYPE_NAME: &'static str = "workspace";
    const INDEXED: &'static [&'static str] = &["name"];

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// A data store; `workspace` is a reference, never an embedded copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataStoreInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub store_type: Option<String>,
    pub enabled: bool,
    pub workspace: Option<InfoRef<WorkspaceInfo>>,
    pub connection_parameters: BTreeMap<String, String>,
}

impl DataStoreInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Place the store in a workspace
    pub fn in_workspace(mut self, workspace: InfoRef<WorkspaceInfo>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Add a connection parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.connection_parameters.insert(key.into(), value.into());
        self
    }
}

impl Info for DataStoreInfo {
    const TYPE_NAME: &'static str = "datastore";
    const INDEXED: &'static [&'static str] = &["name", "type", "enabled", "workspace"];

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub maintainer: Option<String>,
    pub enabled: bool,
    pub workspace: Option<InfoRef<WorkspaceInfo>>,
}

impl ServiceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_maintainer(mut self, maintainer: impl Into<String>) -> Self {
        self.maintainer = Some(maintainer.into());
        self
    }
}

impl Info for ServiceInfo {
    const TYPE_NAME: &'static str = "service";
    const INDEXED: &'static [&'static str] = &["name", "workspace"];

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// Register the built-in catalog types
pub fn register_catalog(registry: &mut CodecRegistry) {
    registry.register::<WorkspaceInfo>();
    registry.register::<DataStoreInfo>();
    registry.register::<ServiceInfo>();
}

/// Create a registry with all built-in catalog types
pub fn default_registry() -> CodecRegistry {
    let mut registry = CodecRegistry::new();
    register_catalog(&mut registry);
    registry
}
