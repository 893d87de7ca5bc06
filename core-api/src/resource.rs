//! # Typed Resources
//!
//! Every resource the core reads or writes is an [`Object`] parameterised by
//! its spec type. The spec type names the kind and the status shape through
//! [`ResourceSpec`], so a `Object<JobSpec>` can only ever carry a `JobStatus`.
//!
//! Conversion to and from the platform's raw representation
//! ([`StoredObject`]) goes through `serde_json`.

use bridge_traits::store::{ObjectKey, ObjectMeta, OwnerReference, StoredObject};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt::Debug;

use crate::error::{ApiError, Result};

/// Spec half of a resource kind.
pub trait ResourceSpec:
    Serialize + DeserializeOwned + Debug + Clone + PartialEq + Send + Sync + 'static
{
    /// Kind name as stored by the platform.
    const KIND: &'static str;

    /// Status half of the resource kind.
    type Status: Serialize
        + DeserializeOwned
        + Debug
        + Clone
        + PartialEq
        + Default
        + Send
        + Sync
        + 'static;
}

/// A typed resource: metadata, desired state and observed state.
#[derive(Debug, Clone, PartialEq)]
pub struct Object<S: ResourceSpec> {
    pub metadata: ObjectMeta,
    pub spec: S,
    pub status: S::Status,
}

impl<S: ResourceSpec> Object<S> {
    /// Build a not-yet-persisted object with an empty status.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: S) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: S::Status::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(S::KIND, self.namespace(), self.name())
    }

    /// Owner reference pointing at this object as the controller of a child.
    pub fn controller_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: S::KIND.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
            block_owner_deletion: true,
        }
    }

    pub fn to_stored(&self) -> Result<StoredObject> {
        let encode = |source| ApiError::Encode {
            kind: S::KIND.to_string(),
            source,
        };
        Ok(StoredObject {
            kind: S::KIND.to_string(),
            metadata: self.metadata.clone(),
            spec: serde_json::to_value(&self.spec).map_err(encode)?,
            status: serde_json::to_value(&self.status).map_err(encode)?,
        })
    }

    pub fn from_stored(stored: StoredObject) -> Result<Self> {
        if stored.kind != S::KIND {
            return Err(ApiError::KindMismatch {
                expected: S::KIND.to_string(),
                found: stored.kind,
            });
        }

        let decode = |source| ApiError::Decode {
            kind: S::KIND.to_string(),
            name: format!("{}/{}", stored.metadata.namespace, stored.metadata.name),
            source,
        };

        let spec = serde_json::from_value(stored.spec.clone()).map_err(decode)?;
        let status = match &stored.status {
            Value::Null => S::Status::default(),
            value => serde_json::from_value(value.clone()).map_err(decode)?,
        };

        Ok(Self {
            metadata: stored.metadata,
            spec,
            status,
        })
    }
}
