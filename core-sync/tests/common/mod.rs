//! Shared fixtures: an in-memory platform with a manual clock, plus helpers
//! that play the platform's part (snapshots becoming ready, jobs finishing).

#![allow(dead_code)]

use bridge_memory::{InMemoryObjectStore, ManualClock};
use chrono::{DateTime, TimeZone, Utc};
use core_api::{
    Client, JobSpec, Object, ReplicationDestination, ReplicationDestinationSpec,
    ReplicationSource, ReplicationSourceSpec, RsyncSourceSpec, TriggerSpec, VolumeSnapshotSpec,
    VolumeSpec,
};
use core_mover::{Registry, RegistryBuilder};
use core_provision::naming::LABEL_ROLE;
use core_runtime::{ControllerConfig, CoreEvent, EventBus, Intervals, ReplicationEvent};
use core_sync::{DestinationReconciler, SourceReconciler, SyncContext};
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;

pub const NS: &str = "default";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub struct Harness {
    pub client: Client,
    pub clock: Arc<ManualClock>,
    pub events: Arc<EventBus>,
    pub ctx: SyncContext,
}

impl Harness {
    /// Platform with the rsync backend registered.
    pub fn new() -> Self {
        let mut registry = RegistryBuilder::new();
        mover_rsync::register(&mut registry).unwrap();
        Self::with_registry(registry.build())
    }

    pub fn with_registry(registry: Registry) -> Self {
        let clock = Arc::new(ManualClock::starting_at(t0()));
        let store = Arc::new(InMemoryObjectStore::with_clock(clock.clone()));
        let config = ControllerConfig::builder()
            .object_store(store)
            .clock(clock.clone())
            .intervals(Intervals::default())
            .build()
            .unwrap();
        let events = Arc::new(EventBus::new(64));
        let ctx = SyncContext::new(&config, Arc::new(registry), events.clone());
        Self {
            client: ctx.client.clone(),
            clock,
            events,
            ctx,
        }
    }

    pub fn sources(&self) -> SourceReconciler {
        SourceReconciler::new(self.ctx.clone())
    }

    pub fn destinations(&self) -> DestinationReconciler {
        DestinationReconciler::new(self.ctx.clone())
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(chrono::Duration::minutes(minutes));
    }

    pub async fn create_volume(&self, name: &str, capacity: &str) {
        let spec = VolumeSpec {
            capacity: Some(capacity.to_string()),
            ..Default::default()
        };
        self.client
            .create(&Object::new(NS, name, spec))
            .await
            .unwrap();
    }

    pub async fn create_source(&self, name: &str, spec: ReplicationSourceSpec) -> ReplicationSource {
        self.client.create(&Object::new(NS, name, spec)).await.unwrap()
    }

    pub async fn create_destination(
        &self,
        name: &str,
        spec: ReplicationDestinationSpec,
    ) -> ReplicationDestination {
        self.client.create(&Object::new(NS, name, spec)).await.unwrap()
    }

    pub async fn source(&self, name: &str) -> ReplicationSource {
        self.client
            .get::<ReplicationSourceSpec>(NS, name)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn destination(&self, name: &str) -> ReplicationDestination {
        self.client
            .get::<ReplicationDestinationSpec>(NS, name)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn update_source(&self, name: &str, edit: impl FnOnce(&mut ReplicationSourceSpec)) {
        let mut source = self.source(name).await;
        edit(&mut source.spec);
        self.client.update(&source).await.unwrap();
    }

    /// The platform finishes every pending snapshot.
    pub async fn ready_snapshots(&self) {
        for mut snapshot in self
            .client
            .list::<VolumeSnapshotSpec>(Some(NS))
            .await
            .unwrap()
        {
            if !snapshot.status.ready_to_use {
                snapshot.status.ready_to_use = true;
                snapshot.status.restore_size = Some("1Gi".to_string());
                self.client.update_status(&snapshot).await.unwrap();
            }
        }
    }

    pub async fn jobs(&self) -> Vec<Object<JobSpec>> {
        self.client.list::<JobSpec>(Some(NS)).await.unwrap()
    }

    /// Every running job exits successfully.
    pub async fn finish_jobs(&self) {
        for mut job in self.jobs().await {
            if !job.is_terminal() {
                job.status.succeeded = 1;
                job.status.completion_time = Some(self.clock_now());
                self.client.update_status(&job).await.unwrap();
            }
        }
    }

    /// Every running job exhausts its retries.
    pub async fn fail_jobs(&self) {
        for mut job in self.jobs().await {
            if !job.is_terminal() {
                job.status.failed = job.spec.backoff_limit + 1;
                self.client.update_status(&job).await.unwrap();
            }
        }
    }

    pub async fn snapshots(&self, role: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .client
            .list::<VolumeSnapshotSpec>(Some(NS))
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.metadata.labels.get(LABEL_ROLE).map(String::as_str) == Some(role))
            .map(|s| s.metadata.name)
            .collect();
        names.sort();
        names
    }

    pub async fn volume_exists(&self, name: &str) -> bool {
        self.client
            .get::<VolumeSpec>(NS, name)
            .await
            .unwrap()
            .is_some()
    }

    /// Drive a source through one complete cycle, playing the platform in
    /// between passes.
    pub async fn run_source_cycle(&self, name: &str) -> core_sync::Action {
        let reconciler = self.sources();
        let before = self.source(name).await.status.last_sync_time;
        for _ in 0..10 {
            let action = reconciler.reconcile(NS, name).await.unwrap();
            let status = self.source(name).await.status;
            if status.cycle.is_none() && status.last_sync_time != before {
                return action;
            }
            self.ready_snapshots().await;
            self.finish_jobs().await;
        }
        panic!("source {} did not complete a cycle", name);
    }

    pub async fn run_destination_cycle(&self, name: &str) -> core_sync::Action {
        let reconciler = self.destinations();
        let before = self.destination(name).await.status.last_sync_time;
        for _ in 0..10 {
            let action = reconciler.reconcile(NS, name).await.unwrap();
            let status = self.destination(name).await.status;
            if status.cycle.is_none() && status.last_sync_time != before {
                return action;
            }
            self.ready_snapshots().await;
            self.finish_jobs().await;
        }
        panic!("destination {} did not complete a cycle", name);
    }

    fn clock_now(&self) -> DateTime<Utc> {
        use bridge_traits::Clock;
        self.clock.now()
    }
}

pub fn rsync_source(pvc: &str, trigger: Option<TriggerSpec>) -> ReplicationSourceSpec {
    ReplicationSourceSpec {
        source_pvc: pvc.to_string(),
        mover: "rsync".to_string(),
        trigger,
        rsync: Some(RsyncSourceSpec {
            address: Some("10.0.0.12".to_string()),
            port: None,
            key_secret: Some("volrep-rsync-key".to_string()),
        }),
        ..Default::default()
    }
}

pub fn schedule(expression: &str) -> Option<TriggerSpec> {
    Some(TriggerSpec {
        schedule: Some(expression.to_string()),
        manual: None,
    })
}

pub fn manual(token: &str) -> Option<TriggerSpec> {
    Some(TriggerSpec {
        schedule: None,
        manual: Some(token.to_string()),
    })
}

/// Replication events received so far.
pub fn drain(receiver: &mut Receiver<CoreEvent>) -> Vec<ReplicationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let CoreEvent::Replication(event) = event {
            events.push(event);
        }
    }
    events
}
