//! # Mover Contract
//!
//! A mover performs the byte transfer of one replication cycle. Reconcilers
//! never talk to a transfer tool directly: they look up the [`Builder`]
//! registered under the spec's `mover` name, build a fresh [`Mover`] for the
//! current cycle and poll it.
//!
//! ## Lifecycle
//!
//! ```text
//! Builder::from_source / from_destination     (once per pass, cheap)
//!        │
//!        ▼
//! Mover::synchronize ── complete=false ──> requeue, build again next pass
//!        │
//!   complete=true
//!        ▼
//! Mover::cleanup                              (idempotent)
//! ```
//!
//! Movers hold no state between passes. Everything they need to find their
//! work again (job names, secrets) derives from the owner and the cycle id
//! carried in [`MoverContext`].

use async_trait::async_trait;
use bridge_traits::Clock;
use core_api::{MoverStatus, ReplicationDestination, ReplicationSource};
use core_provision::Provisioner;
use core_runtime::config::MoverImages;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Outcome of one [`Mover::synchronize`] call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MoverResult {
    /// The transfer of this cycle finished successfully.
    pub complete: bool,
    /// Suggested delay before polling again.
    pub retry_after: Option<Duration>,
    /// Status fragment to merge into the owner's status.
    pub status: MoverStatus,
}

impl MoverResult {
    pub fn in_progress(retry_after: Duration) -> Self {
        Self {
            complete: false,
            retry_after: Some(retry_after),
            status: MoverStatus::default(),
        }
    }

    pub fn completed() -> Self {
        Self {
            complete: true,
            retry_after: None,
            status: MoverStatus::default(),
        }
    }

    pub fn with_status(mut self, status: MoverStatus) -> Self {
        self.status = status;
        self
    }
}

/// Volume the mover reads from (source) or writes to (destination).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataVolume {
    pub name: String,
    pub read_only: bool,
}

impl DataVolume {
    pub fn read_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read_only: true,
        }
    }

    pub fn writable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read_only: false,
        }
    }
}

/// Everything a builder needs besides the owner spec.
#[derive(Clone)]
pub struct MoverContext {
    pub provisioner: Provisioner,
    pub clock: Arc<dyn Clock>,
    /// Identifies the cycle; per-cycle object names derive from it.
    pub cycle_id: String,
    pub images: MoverImages,
    pub job_backoff_limit: u32,
    /// Delay between polls of a running job.
    pub poll_interval: Duration,
    /// Jobs are kept but suspended while the owner is paused.
    pub paused: bool,
}

/// One cycle's data transfer.
#[async_trait]
pub trait Mover: Send + Sync {
    /// Name of the backend that built this mover.
    fn name(&self) -> &str;

    /// Start the transfer if needed and report on it.
    ///
    /// Called once per reconcile pass until it reports `complete`. Repeated
    /// calls for the same cycle never restart work already running.
    async fn synchronize(&self) -> Result<MoverResult>;

    /// Release transient objects this mover created for the cycle.
    ///
    /// Succeeds when nothing was ever started.
    async fn cleanup(&self) -> Result<()>;
}

/// Constructs movers for one backend.
pub trait Builder: Send + Sync {
    /// Name the backend is selected by in a spec's `mover` field.
    fn name(&self) -> &'static str;

    /// Human-readable version information for startup logs.
    fn version_info(&self) -> String;

    /// Build the sending side. Fails with `InvalidSpec` when the backend's
    /// section of the spec is missing or incomplete.
    fn from_source(
        &self,
        ctx: &MoverContext,
        source: &ReplicationSource,
        data: DataVolume,
    ) -> Result<Box<dyn Mover>>;

    /// Build the receiving side.
    fn from_destination(
        &self,
        ctx: &MoverContext,
        destination: &ReplicationDestination,
        data: DataVolume,
    ) -> Result<Box<dyn Mover>>;
}
