//! Object Store Abstraction
//!
//! The cluster object store is owned by the host platform. The core only ever
//! talks to it through [`ObjectStore`], which exposes raw, untyped objects:
//! typed views live in `core-api`.
//!
//! Semantics every implementation must honour:
//!
//! - `create` assigns `uid`, `generation = 1`, `resource_version` and
//!   `creation_timestamp`; it fails with `AlreadyExists` when the key is taken.
//! - `update` replaces metadata (labels, annotations, owner references) and
//!   `spec`, leaving `status` untouched. `generation` is bumped only when the
//!   spec actually changed. A stale `resource_version` fails with `Conflict`.
//! - `update_status` replaces `status` only, with the same optimistic
//!   concurrency check. Status writers therefore never race spec writers.
//! - `delete` removes the object; dependents whose owners are all gone are
//!   garbage collected by the platform, never by the core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

/// Fully qualified identity of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Declared parent-child relationship used for garbage collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
    /// At most one owner reference per object may be the controller.
    #[serde(default)]
    pub controller: bool,
    #[serde(default)]
    pub block_owner_deletion: bool,
}

/// Metadata common to every stored object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// The owner reference flagged as controller, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    /// Whether the object is controlled by the owner with the given uid.
    pub fn is_controlled_by(&self, owner_uid: &str) -> bool {
        self.controller_ref()
            .map(|r| r.uid == owner_uid)
            .unwrap_or(false)
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Raw object as persisted by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: Value,
}

impl StoredObject {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(
            self.kind.clone(),
            self.metadata.namespace.clone(),
            self.metadata.name.clone(),
        )
    }
}

/// Cluster object store trait
///
/// Implementations are provided by the host platform (an API server client in
/// production, `bridge-memory` in tests and local runs).
///
/// # Example
///
/// ```ignore
/// use bridge_traits::store::{ObjectKey, ObjectStore};
///
/// async fn exists(store: &dyn ObjectStore, key: &ObjectKey) -> Result<bool> {
///     Ok(store.get(key).await?.is_some())
/// }
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a single object, `None` when it does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<StoredObject>>;

    /// List objects of a kind, optionally restricted to one namespace.
    async fn list(&self, kind: &str, namespace: Option<&str>) -> Result<Vec<StoredObject>>;

    /// Create a new object and return it as persisted.
    async fn create(&self, object: StoredObject) -> Result<StoredObject>;

    /// Replace metadata and spec of an existing object.
    async fn update(&self, object: StoredObject) -> Result<StoredObject>;

    /// Replace the status of an existing object.
    async fn update_status(&self, object: StoredObject) -> Result<StoredObject>;

    /// Delete an object. Fails with `NotFound` when absent.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}
