//! In-memory object store implementation

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    store::{ObjectKey, ObjectStore, StoredObject},
    time::{Clock, SystemClock},
};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Object store backed by a map guarded by an async lock.
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<ObjectKey, StoredObject>>,
    next_version: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl InMemoryObjectStore {
    /// Create an empty store stamping objects with system time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store stamping objects with the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            next_version: AtomicU64::new(1),
            clock,
        }
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    fn check_version(existing: &StoredObject, incoming: &StoredObject) -> Result<()> {
        if existing.metadata.resource_version != incoming.metadata.resource_version {
            return Err(BridgeError::Conflict {
                kind: incoming.kind.clone(),
                name: format!(
                    "{}/{}",
                    incoming.metadata.namespace, incoming.metadata.name
                ),
                message: format!(
                    "resource version {} is stale (current {})",
                    incoming.metadata.resource_version, existing.metadata.resource_version
                ),
            });
        }
        Ok(())
    }

    fn not_found(key: &ObjectKey) -> BridgeError {
        BridgeError::NotFound {
            kind: key.kind.clone(),
            name: format!("{}/{}", key.namespace, key.name),
        }
    }

    /// Remove every object whose owners are all gone, repeating until the
    /// dependency graph is stable.
    fn collect_garbage(objects: &mut BTreeMap<ObjectKey, StoredObject>) -> usize {
        let mut collected = 0;
        loop {
            let live: HashSet<String> = objects
                .values()
                .map(|o| o.metadata.uid.clone())
                .collect();

            let orphans: Vec<ObjectKey> = objects
                .iter()
                .filter(|(_, o)| {
                    !o.metadata.owner_references.is_empty()
                        && o.metadata
                            .owner_references
                            .iter()
                            .all(|r| !live.contains(&r.uid))
                })
                .map(|(k, _)| k.clone())
                .collect();

            if orphans.is_empty() {
                return collected;
            }

            for key in orphans {
                debug!(object = %key, "Garbage collecting orphaned object");
                objects.remove(&key);
                collected += 1;
            }
        }
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<StoredObject>> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).cloned())
    }

    async fn list(&self, kind: &str, namespace: Option<&str>) -> Result<Vec<StoredObject>> {
        let objects = self.objects.read().await;
        Ok(objects
            .values()
            .filter(|o| o.kind == kind)
            .filter(|o| namespace.map_or(true, |ns| o.metadata.namespace == ns))
            .cloned()
            .collect())
    }

    async fn create(&self, mut object: StoredObject) -> Result<StoredObject> {
        if object.metadata.name.is_empty() {
            return Err(BridgeError::Invalid(format!(
                "{} must have a name",
                object.kind
            )));
        }

        let key = object.key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(BridgeError::AlreadyExists {
                kind: key.kind,
                name: format!("{}/{}", key.namespace, key.name),
            });
        }

        object.metadata.uid = Uuid::new_v4().to_string();
        object.metadata.generation = 1;
        object.metadata.resource_version = self.bump_version();
        object.metadata.creation_timestamp = Some(self.clock.now());
        // Status is a subresource: it is never accepted on create.
        object.status = Value::Null;

        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update(&self, object: StoredObject) -> Result<StoredObject> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        let existing = objects.get_mut(&key).ok_or_else(|| Self::not_found(&key))?;
        Self::check_version(existing, &object)?;

        if existing.spec != object.spec {
            existing.metadata.generation += 1;
            existing.spec = object.spec;
        }
        existing.metadata.labels = object.metadata.labels;
        existing.metadata.annotations = object.metadata.annotations;
        existing.metadata.owner_references = object.metadata.owner_references;
        existing.metadata.resource_version = self.bump_version();

        Ok(existing.clone())
    }

    async fn update_status(&self, object: StoredObject) -> Result<StoredObject> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        let existing = objects.get_mut(&key).ok_or_else(|| Self::not_found(&key))?;
        Self::check_version(existing, &object)?;

        existing.status = object.status;
        existing.metadata.resource_version = self.bump_version();

        Ok(existing.clone())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.write().await;
        if objects.remove(key).is_none() {
            return Err(Self::not_found(key));
        }
        let collected = Self::collect_garbage(&mut objects);
        debug!(object = %key, collected, "Deleted object");
        Ok(())
    }
}
