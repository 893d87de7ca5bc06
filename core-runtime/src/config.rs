//! # Controller Configuration Module
//!
//! Provides configuration management for the replication controller.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! [`ControllerConfig`] holding the platform dependencies and the timing
//! knobs of the reconcilers. It enforces fail-fast validation: the object
//! store is required and every interval must be usable before the controller
//! starts.
//!
//! ## Required Dependencies
//!
//! - `ObjectStore` - all durable state lives there
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `Clock` - defaults to [`SystemClock`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::ControllerConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = ControllerConfig::builder()
//!     .object_store(Arc::new(InMemoryObjectStore::new()))
//!     .poll_interval(Duration::from_secs(30))
//!     .snapshot_ready_timeout(Duration::from_secs(600))
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! Missing dependencies surface as [`Error::CapabilityMissing`], inconsistent
//! values as [`Error::Config`], both with a message naming the fix.

use crate::error::{Error, Result};
use bridge_traits::{Clock, ObjectStore, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// Container images used by the mover jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoverImages {
    pub rsync: String,
    pub rclone: String,
    pub restic: String,
}

impl Default for MoverImages {
    fn default() -> Self {
        Self {
            rsync: "volrep/mover-rsync:latest".to_string(),
            rclone: "volrep/mover-rclone:latest".to_string(),
            restic: "volrep/mover-restic:latest".to_string(),
        }
    }
}

/// Timing knobs of the reconcilers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    /// Requeue delay for idle manual-only resources and running movers.
    pub poll: Duration,
    /// Requeue delay while a snapshot or volume is not ready yet.
    pub snapshot_poll: Duration,
    /// How long a snapshot may stay not-ready before the cycle fails.
    pub snapshot_ready_timeout: Duration,
    /// First transient-failure backoff, doubled per retry.
    pub backoff_base: Duration,
    /// Upper bound of the transient-failure backoff.
    pub backoff_max: Duration,
    /// Delay before a continuous resource retries after a failed cycle.
    pub failure_retry: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(30),
            snapshot_poll: Duration::from_secs(5),
            snapshot_ready_timeout: Duration::from_secs(10 * 60),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(5 * 60),
            failure_retry: Duration::from_secs(60),
        }
    }
}

impl Intervals {
    /// Backoff for the given number of consecutive transient failures.
    pub fn backoff(&self, retries: u32) -> Duration {
        let factor = 1u32.checked_shl(retries.min(31)).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }
}

/// Controller configuration.
///
/// Use [`ControllerConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct ControllerConfig {
    /// Platform object store (required)
    pub store: Arc<dyn ObjectStore>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Namespace to watch, `None` for all namespaces
    pub namespace: Option<String>,

    /// Maximum number of resources reconciled concurrently
    pub workers: usize,

    pub intervals: Intervals,

    /// Retries of a mover job before it counts as failed
    pub job_backoff_limit: u32,

    pub mover_images: MoverImages,
}

impl std::fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("store", &"ObjectStore { ... }")
            .field("clock", &"Clock { ... }")
            .field("namespace", &self.namespace)
            .field("workers", &self.workers)
            .field("intervals", &self.intervals)
            .field("job_backoff_limit", &self.job_backoff_limit)
            .field("mover_images", &self.mover_images)
            .finish()
    }
}

impl ControllerConfig {
    /// Creates a new builder for constructing a `ControllerConfig`.
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - At least one worker
    /// - Every interval is non-zero
    /// - Backoff base does not exceed backoff max
    /// - Mover images are set
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config(
                "Worker count must be greater than 0".to_string(),
            ));
        }

        let intervals = [
            ("poll", self.intervals.poll),
            ("snapshot_poll", self.intervals.snapshot_poll),
            ("snapshot_ready_timeout", self.intervals.snapshot_ready_timeout),
            ("backoff_base", self.intervals.backoff_base),
            ("backoff_max", self.intervals.backoff_max),
            ("failure_retry", self.intervals.failure_retry),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::Config(format!(
                "Interval '{}' must be greater than zero",
                name
            )));
        }

        if self.intervals.backoff_base > self.intervals.backoff_max {
            return Err(Error::Config(
                "Backoff base exceeds backoff max. Lower .backoff_base() or raise .backoff_max()."
                    .to_string(),
            ));
        }

        let images = [
            ("rsync", &self.mover_images.rsync),
            ("rclone", &self.mover_images.rclone),
            ("restic", &self.mover_images.restic),
        ];
        if let Some((mover, _)) = images.iter().find(|(_, image)| image.trim().is_empty()) {
            return Err(Error::Config(format!("Image for mover '{}' is empty", mover)));
        }

        Ok(())
    }
}

/// Builder for constructing [`ControllerConfig`] instances.
#[derive(Default)]
pub struct ControllerConfigBuilder {
    store: Option<Arc<dyn ObjectStore>>,
    clock: Option<Arc<dyn Clock>>,
    namespace: Option<String>,
    workers: Option<usize>,
    intervals: Intervals,
    job_backoff_limit: Option<u32>,
    mover_images: Option<MoverImages>,
}

impl ControllerConfigBuilder {
    /// Sets the object store holding all resources (required).
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the time source. Tests inject a manual clock here.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Restricts the controller to one namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn intervals(mut self, intervals: Intervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.intervals.poll = interval;
        self
    }

    pub fn snapshot_poll_interval(mut self, interval: Duration) -> Self {
        self.intervals.snapshot_poll = interval;
        self
    }

    pub fn snapshot_ready_timeout(mut self, timeout: Duration) -> Self {
        self.intervals.snapshot_ready_timeout = timeout;
        self
    }

    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.intervals.backoff_base = base;
        self
    }

    pub fn backoff_max(mut self, max: Duration) -> Self {
        self.intervals.backoff_max = max;
        self
    }

    pub fn failure_retry_interval(mut self, interval: Duration) -> Self {
        self.intervals.failure_retry = interval;
        self
    }

    pub fn job_backoff_limit(mut self, limit: u32) -> Self {
        self.job_backoff_limit = Some(limit);
        self
    }

    pub fn mover_images(mut self, images: MoverImages) -> Self {
        self.mover_images = Some(images);
        self
    }

    /// Builds the final `ControllerConfig` instance.
    ///
    /// # Errors
    ///
    /// - `CapabilityMissing` when no object store was provided
    /// - `Config` when a value fails [`ControllerConfig::validate`]
    pub fn build(self) -> Result<ControllerConfig> {
        let store = self.store.ok_or_else(|| Error::CapabilityMissing {
            capability: "ObjectStore".to_string(),
            message: "An ObjectStore implementation is required: all replication state lives \
                      in the platform object store. Use .object_store() to inject one \
                      (bridge-memory provides an in-memory store)."
                .to_string(),
        })?;

        let config = ControllerConfig {
            store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            namespace: self.namespace,
            workers: self.workers.unwrap_or(4),
            intervals: self.intervals,
            job_backoff_limit: self.job_backoff_limit.unwrap_or(2),
            mover_images: self.mover_images.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_memory::InMemoryObjectStore;

    fn builder() -> ControllerConfigBuilder {
        ControllerConfig::builder().object_store(Arc::new(InMemoryObjectStore::new()))
    }

    #[test]
    fn test_defaults() {
        let config = builder().build().unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.job_backoff_limit, 2);
        assert_eq!(config.intervals, Intervals::default());
        assert!(config.namespace.is_none());
    }

    #[test]
    fn test_missing_store_fails_fast() {
        let err = ControllerConfig::builder().build().unwrap_err();
        assert!(matches!(
            err,
            Error::CapabilityMissing { ref capability, .. } if capability == "ObjectStore"
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = builder()
            .snapshot_poll_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("snapshot_poll"));
    }

    #[test]
    fn test_backoff_bounds_rejected() {
        let err = builder()
            .backoff_base(Duration::from_secs(600))
            .backoff_max(Duration::from_secs(60))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_mover_image_rejected() {
        let images = MoverImages {
            rclone: " ".to_string(),
            ..Default::default()
        };
        let err = builder().mover_images(images).build().unwrap_err();
        assert!(err.to_string().contains("rclone"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let intervals = Intervals {
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(intervals.backoff(0), Duration::from_secs(1));
        assert_eq!(intervals.backoff(3), Duration::from_secs(8));
        assert_eq!(intervals.backoff(4), Duration::from_secs(10));
        assert_eq!(intervals.backoff(200), Duration::from_secs(10));
    }
}
