//! # Controller Loop
//!
//! Drives the reconcilers the way a watch-based controller would:
//!
//! - a resync task lists every `ReplicationSource` and `ReplicationDestination`
//!   in scope each poll interval and queues those that are new, changed
//!   since the last listing, or have no requeue pending;
//! - `workers` tasks take keys off the [`WorkQueue`] and run one reconcile
//!   pass each;
//! - the returned [`Action`] decides whether the key is queued again and
//!   when.
//!
//! The loop runs until its [`CancellationToken`] is cancelled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use core_api::{Client, Object, ReplicationDestinationSpec, ReplicationSourceSpec, ResourceSpec};
use core_runtime::events::ControllerEvent;
use core_runtime::{CoreEvent, EventBus};
use core_sync::{Action, DestinationReconciler, SourceReconciler, SyncContext};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::queue::{ResourceKind, WorkKey, WorkQueue};

pub struct Controller {
    client: Client,
    sources: Arc<SourceReconciler>,
    destinations: Arc<DestinationReconciler>,
    events: Arc<EventBus>,
    namespace: Option<String>,
    workers: usize,
    resync: Duration,
    retry: Duration,
    movers: Vec<String>,
    queue: WorkQueue,
    /// Generation of each resource at the last resync.
    observed: Mutex<HashMap<WorkKey, i64>>,
    shutdown: CancellationToken,
}

impl Controller {
    pub fn new(
        ctx: SyncContext,
        namespace: Option<String>,
        workers: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client: ctx.client.clone(),
            events: ctx.events.clone(),
            resync: ctx.intervals.poll,
            retry: ctx.intervals.failure_retry,
            movers: ctx.registry.names(),
            sources: Arc::new(SourceReconciler::new(ctx.clone())),
            destinations: Arc::new(DestinationReconciler::new(ctx)),
            namespace,
            workers: workers.max(1),
            queue: WorkQueue::new(shutdown.clone()),
            observed: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Queue a resource outside the resync cycle.
    pub fn enqueue(&self, key: WorkKey) {
        self.queue.add(key);
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token is cancelled.
    pub async fn run(self) -> Result<()> {
        let this = Arc::new(self);
        info!(
            workers = this.workers,
            movers = ?this.movers,
            namespace = ?this.namespace,
            "Controller starting"
        );
        this.events
            .emit(CoreEvent::Controller(ControllerEvent::Started {
                workers: this.workers,
                movers: this.movers.clone(),
            }))
            .ok();

        let mut tasks = Vec::with_capacity(this.workers + 1);
        tasks.push(tokio::spawn({
            let this = this.clone();
            async move { this.resync_loop().await }
        }));
        for id in 0..this.workers {
            let this = this.clone();
            tasks.push(tokio::spawn(async move { this.worker(id).await }));
        }

        for joined in join_all(tasks).await {
            if let Err(e) = joined {
                error!(error = %e, "Controller task aborted");
            }
        }

        info!("Controller stopped");
        this.events
            .emit(CoreEvent::Controller(ControllerEvent::Stopped))
            .ok();
        Ok(())
    }

    async fn resync_loop(&self) {
        loop {
            self.resync_once().await;
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.resync) => {}
            }
        }
    }

    /// Queue replication resources in scope that need a pass.
    pub async fn resync_once(&self) {
        let namespace = self.namespace.as_deref();
        let mut seen = HashMap::new();
        match self.client.list::<ReplicationSourceSpec>(namespace).await {
            Ok(sources) => Self::collect(ResourceKind::Source, sources, &mut seen),
            Err(e) => warn!(error = %e, "Failed to list replication sources"),
        }
        match self.client.list::<ReplicationDestinationSpec>(namespace).await {
            Ok(destinations) => Self::collect(ResourceKind::Destination, destinations, &mut seen),
            Err(e) => warn!(error = %e, "Failed to list replication destinations"),
        }

        let previous = {
            let mut observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *observed, seen.clone())
        };
        for (key, generation) in seen {
            let changed = previous.get(&key) != Some(&generation);
            if changed || !self.queue.is_waiting(&key) {
                self.queue.add(key);
            }
        }
    }

    fn collect<S: ResourceSpec>(
        kind: ResourceKind,
        objects: Vec<Object<S>>,
        seen: &mut HashMap<WorkKey, i64>,
    ) {
        for object in objects {
            let generation = object.generation();
            let key = WorkKey {
                kind,
                namespace: object.metadata.namespace,
                name: object.metadata.name,
            };
            seen.insert(key, generation);
        }
    }

    async fn worker(&self, id: usize) {
        debug!(worker = id, "Worker started");
        while let Some(key) = self.queue.next().await {
            self.process(&key).await;
            self.queue.done(&key);
        }
        debug!(worker = id, "Worker stopped");
    }

    #[instrument(skip(self, key), fields(key = %key))]
    async fn process(&self, key: &WorkKey) {
        let outcome = match key.kind {
            ResourceKind::Source => self.sources.reconcile(&key.namespace, &key.name).await,
            ResourceKind::Destination => {
                self.destinations
                    .reconcile(&key.namespace, &key.name)
                    .await
            }
        };
        match outcome {
            Ok(Action::Requeue(delay)) => {
                debug!(delay_secs = delay.as_secs(), "Requeue");
                self.queue.add_after(key.clone(), delay);
            }
            // Picked up again by the next resync.
            Ok(Action::AwaitChange) => debug!("Waiting for change"),
            Err(e) => {
                error!(error = %e, "Reconcile failed");
                self.queue.add_after(key.clone(), self.retry);
            }
        }
    }
}
