//! # Mover Registry
//!
//! Backends register a [`Builder`] under their name once at startup. After
//! [`RegistryBuilder::install`] the set is frozen and shared read-only by all
//! reconcile workers.
//!
//! ## Usage
//!
//! ```ignore
//! let mut builder = RegistryBuilder::new();
//! mover_rsync::register(&mut builder)?;
//! let registry = builder.install()?;
//! let rsync = registry.builder_for("rsync")?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::info;

use crate::error::{MoverError, Result};
use crate::mover::Builder;

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

/// Mutable registration phase.
#[derive(Default)]
pub struct RegistryBuilder {
    builders: BTreeMap<String, Arc<dyn Builder>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend. Names are unique.
    pub fn register(&mut self, builder: Arc<dyn Builder>) -> Result<()> {
        let name = builder.name().to_string();
        if self.builders.contains_key(&name) {
            return Err(MoverError::DuplicateMover { name });
        }
        info!(mover = %name, version = %builder.version_info(), "Registered mover");
        self.builders.insert(name, builder);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Freeze into a registry without touching the process-wide instance.
    pub fn build(self) -> Registry {
        Registry {
            builders: self.builders,
        }
    }

    /// Freeze and publish as the process-wide registry. Only the first call
    /// succeeds.
    pub fn install(self) -> Result<Arc<Registry>> {
        let registry = Arc::new(self.build());
        GLOBAL
            .set(registry.clone())
            .map_err(|_| MoverError::AlreadyInitialized)?;
        Ok(registry)
    }
}

/// Frozen name to builder map.
pub struct Registry {
    builders: BTreeMap<String, Arc<dyn Builder>>,
}

impl Registry {
    /// The registry published by [`RegistryBuilder::install`].
    pub fn global() -> Result<Arc<Registry>> {
        GLOBAL.get().cloned().ok_or(MoverError::NotInitialized)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Builder>> {
        self.builders.get(name).cloned()
    }

    pub fn builder_for(&self, name: &str) -> Result<Arc<dyn Builder>> {
        self.lookup(name).ok_or_else(|| MoverError::UnknownMoverKind {
            name: name.to_string(),
        })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.builders.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("movers", &self.names())
            .finish()
    }
}
