//! Core service façade and bootstrap helpers.
//!
//! This crate wires a host-provided platform (an `ObjectStore` and a `Clock`,
//! carried by [`ControllerConfig`]) and the compiled-in mover backends into
//! the replication reconcilers. Each backend sits behind a cargo feature
//! (`rsync`, `rclone`, `restic`); all are enabled by default.
//!
//! ```ignore
//! let config = ControllerConfig::builder()
//!     .object_store(store)
//!     .clock(clock)
//!     .build()?;
//! let service = core_service::bootstrap(config)?;
//! let shutdown = CancellationToken::new();
//! service.controller(shutdown.clone()).run().await?;
//! ```

pub mod bootstrap;
pub mod controller;
pub mod error;
pub mod queue;

pub use bootstrap::{bootstrap, install_movers, register_movers, run};
pub use controller::Controller;
pub use error::{CoreError, Result};
pub use queue::{ResourceKind, WorkKey, WorkQueue};

use std::sync::Arc;

use core_mover::Registry;
use core_runtime::{ControllerConfig, CoreEvent, EventBus};
use core_sync::{Action, DestinationReconciler, SourceReconciler, SyncContext};
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 256;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    ctx: SyncContext,
    namespace: Option<String>,
    workers: usize,
}

impl CoreService {
    /// Create a service over an explicit mover registry.
    pub fn new(config: ControllerConfig, registry: Arc<Registry>) -> Result<Self> {
        config.validate()?;
        let events = Arc::new(EventBus::new(EVENT_CAPACITY));
        Ok(Self {
            ctx: SyncContext::new(&config, registry, events),
            namespace: config.namespace.clone(),
            workers: config.workers,
        })
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.ctx.registry)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.ctx.events)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.ctx.events.subscribe()
    }

    /// A controller loop over this service's reconcilers.
    pub fn controller(&self, shutdown: CancellationToken) -> Controller {
        Controller::new(
            self.ctx.clone(),
            self.namespace.clone(),
            self.workers,
            shutdown,
        )
    }

    /// Run one pass for a source, outside any controller loop.
    pub async fn reconcile_source(&self, namespace: &str, name: &str) -> Result<Action> {
        Ok(SourceReconciler::new(self.ctx.clone())
            .reconcile(namespace, name)
            .await?)
    }

    /// Run one pass for a destination, outside any controller loop.
    pub async fn reconcile_destination(&self, namespace: &str, name: &str) -> Result<Action> {
        Ok(DestinationReconciler::new(self.ctx.clone())
            .reconcile(namespace, name)
            .await?)
    }
}
