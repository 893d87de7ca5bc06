//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the replication
//! controller:
//! - Logging and tracing infrastructure
//! - Controller configuration
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities every other crate depends on.
//! It establishes the logging conventions, the configuration builder and the
//! event broadcasting used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{ControllerConfig, ControllerConfigBuilder, Intervals, MoverImages};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, ReplicationEvent};
