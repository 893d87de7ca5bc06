//! # Event Bus System
//!
//! Provides an event-driven side channel for the replication controller using
//! `tokio::sync::broadcast`. Reconcilers publish what happened to a resource;
//! anything interested (a metrics exporter, an audit log, tests) subscribes.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: [`CoreEvent`] wrapping per-domain enums
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐   emit    ┌───────────┐
//! │ Source Reconciler  ├──────────>│           │   subscribe   ┌────────────┐
//! └────────────────────┘           │ EventBus  ├──────────────>│ Subscriber │
//! ┌────────────────────┐   emit    │ (broadcast│               └────────────┘
//! │ Dest. Reconciler   ├──────────>│  channel) │
//! └────────────────────┘           │           │
//! ┌────────────────────┐   emit    │           │
//! │ Controller         ├──────────>│           │
//! └────────────────────┘           └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, ReplicationEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Replication(ReplicationEvent::SyncStarted {
//!         kind: "ReplicationSource".to_string(),
//!         namespace: "default".to_string(),
//!         name: "database".to_string(),
//!         cycle_id: "20240101000000".to_string(),
//!         mover: "rsync".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Replication cycle started");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Publishing never fails a reconcile pass: reconcilers ignore the "no
//! subscribers" error.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Per-resource replication events
    Replication(ReplicationEvent),
    /// Controller lifecycle events
    Controller(ControllerEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Replication(e) => e.description(),
            CoreEvent::Controller(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Replication(ReplicationEvent::ConfigurationError { .. }) => {
                EventSeverity::Error
            }
            CoreEvent::Replication(ReplicationEvent::SyncFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Replication(ReplicationEvent::SyncCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Controller(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Replication Events
// ============================================================================

/// Events describing the progress of one source or destination.
///
/// `kind` is the resource kind (`ReplicationSource` or
/// `ReplicationDestination`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ReplicationEvent {
    /// A trigger fired and a new cycle was recorded.
    SyncStarted {
        kind: String,
        namespace: String,
        name: String,
        cycle_id: String,
        mover: String,
    },
    /// The cycle completed and status was updated.
    SyncCompleted {
        kind: String,
        namespace: String,
        name: String,
        cycle_id: String,
        duration_secs: i64,
        /// Name of the image published as latest, if any.
        latest_image: Option<String>,
    },
    /// The cycle was abandoned; the next trigger retries.
    SyncFailed {
        kind: String,
        namespace: String,
        name: String,
        cycle_id: Option<String>,
        reason: String,
        message: String,
    },
    /// The spec is unusable; the resource is suspended until it changes.
    ConfigurationError {
        kind: String,
        namespace: String,
        name: String,
        generation: i64,
        reason: String,
        message: String,
    },
    /// Old snapshots beyond the retention count were deleted.
    SnapshotsPruned {
        kind: String,
        namespace: String,
        name: String,
        deleted: Vec<String>,
    },
}

impl ReplicationEvent {
    fn description(&self) -> &str {
        match self {
            ReplicationEvent::SyncStarted { .. } => "Replication cycle started",
            ReplicationEvent::SyncCompleted { .. } => "Replication cycle completed",
            ReplicationEvent::SyncFailed { .. } => "Replication cycle failed",
            ReplicationEvent::ConfigurationError { .. } => "Replication configuration error",
            ReplicationEvent::SnapshotsPruned { .. } => "Snapshots pruned",
        }
    }
}

// ============================================================================
// Controller Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ControllerEvent {
    Started { workers: usize, movers: Vec<String> },
    Stopped,
}

impl ControllerEvent {
    fn description(&self) -> &str {
        match self {
            ControllerEvent::Started { .. } => "Controller started",
            ControllerEvent::Stopped => "Controller stopped",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for broadcasting events to multiple subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers falling behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Publishes a replication event, ignoring the absence of subscribers.
    pub fn publish(&self, event: ReplicationEvent) {
        self.emit(CoreEvent::Replication(event)).ok();
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
