//! # In-Memory Bridge Implementations
//!
//! Reference implementations of the bridge traits that keep all state in
//! process memory.
//!
//! ## Overview
//!
//! This crate provides:
//! - `InMemoryObjectStore`: an `ObjectStore` with resource versions,
//!   generations, a separate status subresource and owner-reference garbage
//!   collection, mirroring the semantics of a cluster API server
//! - `ManualClock`: a `Clock` that only moves when told to
//!
//! Reconciler tests and local dry runs use these instead of a live cluster.
//! Nothing here runs jobs or readies snapshots: tests play the part of the
//! platform controllers by writing child status directly.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_memory::{InMemoryObjectStore, ManualClock};
//! use std::sync::Arc;
//!
//! let clock = Arc::new(ManualClock::starting_at(start));
//! let store = Arc::new(InMemoryObjectStore::with_clock(clock.clone()));
//! ```

mod clock;
mod store;

pub use clock::ManualClock;
pub use store::InMemoryObjectStore;
