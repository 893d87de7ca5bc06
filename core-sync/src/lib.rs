//! # Replication Reconcilers
//!
//! Drives replication sources and destinations through their cycles.
//!
//! ## Overview
//!
//! Each reconcile pass reads one resource, works out where its current cycle
//! stands from the persisted status, does as much as it can without waiting
//! and returns an [`Action`] telling the caller when to look again. Nothing
//! blocks: snapshot readiness and mover jobs are polled on later passes.
//!
//! ## Components
//!
//! - **Trigger evaluation** (`trigger`, `schedule`): pure decision whether a
//!   cycle may start (continuous, cron, `@every`, manual token)
//! - **Source reconciler** (`source`): snapshot or clone the source volume
//!   and push it through the configured mover
//! - **Destination reconciler** (`destination`): receive into a persistent
//!   volume and capture a point-in-time image per cycle
//! - **Context** (`context`): shared clients, registry, clock and intervals
//!
//! Failures are classified by [`SyncError::class`]: transient ones back off,
//! retryable ones abandon the cycle until the next trigger, and permanent
//! ones suspend the resource until its spec changes.

pub mod context;
mod cycle;
pub mod destination;
pub mod error;
pub mod schedule;
pub mod source;
pub mod trigger;

pub use context::{Action, SyncContext};
pub use destination::DestinationReconciler;
pub use error::{ErrorClass, Result, SyncError, TriggerError};
pub use schedule::Schedule;
pub use source::SourceReconciler;
pub use trigger::{evaluate, next_sync_after, should_sync, Evaluation, TriggerState};
