//! Shared dependencies of the reconcilers and the outcome of a pass.

use bridge_traits::Clock;
use chrono::{DateTime, Utc};
use core_api::Client;
use core_mover::{MoverContext, Registry};
use core_provision::{Provisioner, SnapshotCoordinator};
use core_runtime::config::{ControllerConfig, Intervals, MoverImages};
use core_runtime::EventBus;
use std::sync::Arc;
use std::time::Duration;

/// What the caller should do after a reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run another pass after the delay.
    Requeue(Duration),
    /// Nothing to do until the resource changes.
    AwaitChange,
}

impl Action {
    pub fn requeue(after: Duration) -> Self {
        Action::Requeue(after)
    }

    /// Requeue at `at`, or right away when that is already past.
    pub fn requeue_at(at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Action::Requeue((at - now).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            Action::Requeue(after) => Some(*after),
            Action::AwaitChange => None,
        }
    }
}

/// Everything a reconcile pass needs, cheap to clone into workers.
#[derive(Clone)]
pub struct SyncContext {
    pub client: Client,
    pub provisioner: Provisioner,
    pub snapshots: SnapshotCoordinator,
    pub registry: Arc<Registry>,
    pub clock: Arc<dyn Clock>,
    pub intervals: Intervals,
    pub job_backoff_limit: u32,
    pub mover_images: MoverImages,
    pub events: Arc<EventBus>,
}

impl SyncContext {
    pub fn new(config: &ControllerConfig, registry: Arc<Registry>, events: Arc<EventBus>) -> Self {
        let client = Client::new(config.store.clone());
        let provisioner = Provisioner::new(client.clone());
        let snapshots = SnapshotCoordinator::new(provisioner.clone(), config.clock.clone());
        Self {
            client,
            provisioner,
            snapshots,
            registry,
            clock: config.clock.clone(),
            intervals: config.intervals,
            job_backoff_limit: config.job_backoff_limit,
            mover_images: config.mover_images.clone(),
            events,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn mover_context(&self, cycle_id: &str, paused: bool) -> MoverContext {
        MoverContext {
            provisioner: self.provisioner.clone(),
            clock: self.clock.clone(),
            cycle_id: cycle_id.to_string(),
            images: self.mover_images.clone(),
            job_backoff_limit: self.job_backoff_limit,
            poll_interval: self.intervals.poll,
            paused,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_requeue_at() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            Action::requeue_at(now + chrono::Duration::seconds(90), now),
            Action::Requeue(Duration::from_secs(90))
        );
        assert_eq!(
            Action::requeue_at(now - chrono::Duration::seconds(5), now),
            Action::Requeue(Duration::ZERO)
        );
        assert_eq!(Action::AwaitChange.delay(), None);
    }
}
