//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by the host platform
//! the replication controller runs on.
//!
//! ## Overview
//!
//! This crate defines the contract between the replication core and the
//! surrounding orchestration platform. The core never persists anything on its
//! own: every piece of durable state (specs, status, jobs, volumes, snapshots,
//! credentials) lives in the platform's object store and is reached through
//! the traits below.
//!
//! ## Traits
//!
//! - [`ObjectStore`](store::ObjectStore) - create/get/list/update/delete of
//!   raw objects, status subresource, owner-reference garbage collection
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Implementations
//!
//! | Platform            | Implementation Crate |
//! |---------------------|----------------------|
//! | In-memory / tests   | `bridge-memory`      |
//! | Cluster API server  | provided by the host |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type.
//! Implementations should map platform failures onto its variants so the core
//! can tell transient conditions (`Conflict`, `NotAvailable`) from final ones.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`: reconcilers for distinct resources
//! run concurrently against the same store.

pub mod error;
pub mod store;
pub mod time;

pub use error::BridgeError;

pub use store::{ObjectKey, ObjectMeta, ObjectStore, OwnerReference, StoredObject};
pub use time::{Clock, SystemClock};
