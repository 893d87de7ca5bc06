//! Typed client over the platform object store.

use bridge_traits::store::{ObjectKey, ObjectStore};
use std::sync::Arc;
use tracing::trace;

use crate::error::Result;
use crate::resource::{Object, ResourceSpec};

/// Typed access to an [`ObjectStore`].
///
/// Cheap to clone; all clones share the same store.
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn ObjectStore>,
}

impl Client {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub async fn get<S: ResourceSpec>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Object<S>>> {
        let key = ObjectKey::new(S::KIND, namespace, name);
        match self.store.get(&key).await? {
            Some(stored) => Ok(Some(Object::from_stored(stored)?)),
            None => Ok(None),
        }
    }

    pub async fn list<S: ResourceSpec>(&self, namespace: Option<&str>) -> Result<Vec<Object<S>>> {
        self.store
            .list(S::KIND, namespace)
            .await?
            .into_iter()
            .map(Object::from_stored)
            .collect()
    }

    /// Objects of a kind in `namespace` controlled by the owner with `owner_uid`.
    pub async fn list_owned<S: ResourceSpec>(
        &self,
        namespace: &str,
        owner_uid: &str,
    ) -> Result<Vec<Object<S>>> {
        Ok(self
            .list::<S>(Some(namespace))
            .await?
            .into_iter()
            .filter(|o| o.metadata.is_controlled_by(owner_uid))
            .collect())
    }

    pub async fn create<S: ResourceSpec>(&self, object: &Object<S>) -> Result<Object<S>> {
        trace!(kind = S::KIND, name = %object.name(), "Creating object");
        let created = self.store.create(object.to_stored()?).await?;
        Object::from_stored(created)
    }

    pub async fn update<S: ResourceSpec>(&self, object: &Object<S>) -> Result<Object<S>> {
        let updated = self.store.update(object.to_stored()?).await?;
        Object::from_stored(updated)
    }

    pub async fn update_status<S: ResourceSpec>(&self, object: &Object<S>) -> Result<Object<S>> {
        let updated = self.store.update_status(object.to_stored()?).await?;
        Object::from_stored(updated)
    }

    /// Delete an object. Returns `false` when it was already gone.
    pub async fn delete<S: ResourceSpec>(&self, namespace: &str, name: &str) -> Result<bool> {
        let key = ObjectKey::new(S::KIND, namespace, name);
        match self.store.delete(&key).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
