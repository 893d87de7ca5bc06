//! # Source Reconciler
//!
//! Drives a `ReplicationSource` through one replication cycle at a time:
//!
//! ```text
//! Idle ──trigger──> Triggered ──Snapshot──> Snapshotting ──ready──┐
//!                       │  └──Clone: clone volume──────────────┐  │
//!                       └──Direct──────────────────────────────┤  │
//!                                                               ▼  ▼
//!                  Idle <── Completing <──mover complete── Syncing
//! ```
//!
//! Each pass resumes from the persisted [`CycleState`]: the position in the
//! machine is derived from which cycle fields are set, so a pass interrupted
//! anywhere (or a resource suspended mid-cycle and later fixed) picks up
//! where it stopped. Child objects are always found again by name.

use core_api::{
    reasons, CopyMethod, CycleState, ReplicationSource, ReplicationSourceSpec, ReplicationStatus,
    ResourceSpec, SourcePhase, TypedLocalObjectReference, VolumeSnapshotSpec, VolumeSpec,
};
use core_mover::{Builder, DataVolume};
use core_provision::naming::{cycle_child, owner_labels, LABEL_CYCLE};
use core_provision::{ProvisionError, Role};
use core_runtime::events::ReplicationEvent;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

use crate::context::{Action, SyncContext};
use crate::cycle;
use crate::error::Result;
use crate::trigger;

/// Where a cycle stands, derived from its persisted state.
enum Stage<'a> {
    Triggered,
    Snapshotting { snapshot: &'a str },
    Syncing { volume: &'a str },
    Completing,
}

impl<'a> Stage<'a> {
    fn of(cycle: &'a CycleState) -> Self {
        match (&cycle.working_volume, &cycle.snapshot) {
            _ if cycle.transferred => Stage::Completing,
            (Some(volume), _) => Stage::Syncing { volume },
            (None, Some(snapshot)) => Stage::Snapshotting { snapshot },
            (None, None) => Stage::Triggered,
        }
    }
}

enum Step {
    Continue,
    Done(Action),
}

pub struct SourceReconciler {
    ctx: SyncContext,
}

impl SourceReconciler {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Run one pass for the named source.
    ///
    /// Errors are classified and recorded in status here; an `Err` is only
    /// returned when even that could not be written.
    #[instrument(skip(self), fields(kind = "ReplicationSource"))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        let Some(mut source) = self
            .ctx
            .client
            .get::<ReplicationSourceSpec>(namespace, name)
            .await?
        else {
            debug!("Source no longer exists");
            return Ok(Action::AwaitChange);
        };

        if source.status.is_suspended(source.generation()) {
            debug!(generation = source.generation(), "Suspended until the spec changes");
            return Ok(Action::AwaitChange);
        }

        match self.run(&mut source).await {
            Ok(action) => Ok(action),
            Err(err) => {
                let failure =
                    cycle::record_failure::<ReplicationSourceSpec, _>(&self.ctx, namespace, name, err)
                        .await?;
                if let Some((source, abandoned)) = failure.abandoned {
                    self.discard(&source, &abandoned).await;
                }
                Ok(failure.action)
            }
        }
    }

    async fn run(&self, source: &mut ReplicationSource) -> Result<Action> {
        let pristine = source.status.clone();
        let now = self.ctx.now();
        let generation = source.generation();
        cycle::observe(&mut source.status, generation, now);

        let builder = self.validate(source)?;

        if source.spec.paused {
            return self.pause(source, builder.as_ref(), &pristine).await;
        }

        loop {
            let step = match source.status.cycle.clone() {
                None => self.idle(source, &pristine).await?,
                Some(state) => match Stage::of(&state) {
                    Stage::Triggered => self.triggered(source, &state).await?,
                    Stage::Snapshotting { snapshot } => {
                        self.snapshotting(source, &state, snapshot).await?
                    }
                    Stage::Syncing { volume } => {
                        self.syncing(source, &state, volume, builder.as_ref()).await?
                    }
                    Stage::Completing => self.completing(source, &state, builder.as_ref()).await?,
                },
            };
            if let Step::Done(action) = step {
                return Ok(action);
            }
        }
    }

    /// Configuration problems surface before any child object is created.
    fn validate(&self, source: &ReplicationSource) -> Result<std::sync::Arc<dyn Builder>> {
        let builder = self.ctx.registry.builder_for(&source.spec.mover)?;
        let scratch = self.ctx.mover_context("", false);
        builder.from_source(&scratch, source, DataVolume::read_only(&source.spec.source_pvc))?;
        trigger::next_sync_after(source.spec.trigger.as_ref(), self.ctx.now())?;
        Ok(builder)
    }

    async fn idle(
        &self,
        source: &mut ReplicationSource,
        pristine: &ReplicationStatus<SourcePhase>,
    ) -> Result<Step> {
        let now = self.ctx.now();
        let trigger = source.spec.trigger.as_ref();
        let evaluation = trigger::evaluate(trigger, &cycle::trigger_state(&source.status), now)?;

        if !evaluation.fire {
            cycle::wait_for_trigger(&mut source.status, evaluation.next_sync, now);
            if source.status != *pristine {
                cycle::persist(&self.ctx, source).await?;
            }
            let action = match evaluation.next_sync {
                Some(next) => Action::requeue_at(next, now),
                None => Action::requeue(self.ctx.intervals.poll),
            };
            return Ok(Step::Done(action));
        }

        let id = cycle::begin(
            &mut source.status,
            evaluation.manual_token,
            SourcePhase::Triggered,
            now,
        );
        cycle::persist(&self.ctx, source).await?;
        info!(cycle = %id, mover = %source.spec.mover, "Replication cycle started");

        self.ctx.events.publish(ReplicationEvent::SyncStarted {
            kind: kind(),
            namespace: source.namespace().to_string(),
            name: source.name().to_string(),
            cycle_id: id,
            mover: source.spec.mover.clone(),
        });
        Ok(Step::Continue)
    }

    /// Resolve the copy method into the volume the mover will read.
    async fn triggered(&self, source: &mut ReplicationSource, state: &CycleState) -> Result<Step> {
        let namespace = source.namespace();
        let source_volume = self
            .ctx
            .client
            .get::<VolumeSpec>(namespace, &source.spec.source_pvc)
            .await?
            .ok_or_else(|| ProvisionError::InvalidVolumeReference {
                name: source.spec.source_pvc.clone(),
            })?;

        let options = &source.spec.volume;
        let child = cycle_child(Role::Source, source.name(), &state.id);
        let now = self.ctx.now();

        match options.copy_method {
            CopyMethod::Direct => {
                let volume = source_volume.name().to_string();
                set_cycle(source, |c| c.working_volume = Some(volume));
                cycle::progress(&mut source.status, SourcePhase::Syncing, reasons::SYNC_IN_PROGRESS, "", now);
            }
            CopyMethod::Clone => {
                let spec = VolumeSpec {
                    capacity: options
                        .capacity
                        .clone()
                        .or_else(|| source_volume.status.capacity.clone())
                        .or_else(|| source_volume.spec.capacity.clone()),
                    storage_class_name: options
                        .storage_class_name
                        .clone()
                        .or_else(|| source_volume.spec.storage_class_name.clone()),
                    access_modes: options.access_modes.clone(),
                    data_source: Some(TypedLocalObjectReference::volume(source_volume.name())),
                };
                self.ctx
                    .provisioner
                    .ensure_volume(source, &child, spec, cycle_labels(source, &state.id))
                    .await?;
                debug!(volume = %child, "Clone volume provisioned");
                set_cycle(source, |c| c.working_volume = Some(child.clone()));
                cycle::progress(&mut source.status, SourcePhase::Syncing, reasons::SYNC_IN_PROGRESS, "", now);
            }
            CopyMethod::Snapshot => {
                self.ctx
                    .snapshots
                    .create_snapshot(
                        source,
                        &source.spec.source_pvc,
                        &child,
                        options.volume_snapshot_class_name.as_deref(),
                        Role::Source,
                    )
                    .await?;
                set_cycle(source, |c| c.snapshot = Some(child.clone()));
                cycle::progress(
                    &mut source.status,
                    SourcePhase::Snapshotting,
                    reasons::WAITING_FOR_SNAPSHOT,
                    format!("Waiting for snapshot {}", child),
                    now,
                );
            }
        }

        cycle::persist(&self.ctx, source).await?;
        Ok(Step::Continue)
    }

    /// Wait for the snapshot, then restore it into a volume the mover can
    /// mount.
    async fn snapshotting(
        &self,
        source: &mut ReplicationSource,
        state: &CycleState,
        snapshot: &str,
    ) -> Result<Step> {
        let namespace = source.namespace();
        let ready = self
            .ctx
            .snapshots
            .await_ready(namespace, snapshot, self.ctx.intervals.snapshot_ready_timeout)
            .await?;
        let now = self.ctx.now();

        if !ready {
            let before = source.status.clone();
            cycle::progress(
                &mut source.status,
                SourcePhase::Snapshotting,
                reasons::WAITING_FOR_SNAPSHOT,
                format!("Waiting for snapshot {}", snapshot),
                now,
            );
            if source.status != before {
                cycle::persist(&self.ctx, source).await?;
            }
            return Ok(Step::Done(Action::requeue(self.ctx.intervals.snapshot_poll)));
        }

        let restored = self
            .ctx
            .client
            .get::<VolumeSnapshotSpec>(namespace, snapshot)
            .await?
            .and_then(|s| s.status.restore_size);
        let options = &source.spec.volume;
        let spec = VolumeSpec {
            capacity: options.capacity.clone().or(restored),
            storage_class_name: options.storage_class_name.clone(),
            access_modes: options.access_modes.clone(),
            data_source: Some(TypedLocalObjectReference::snapshot(snapshot)),
        };
        // Restored volumes share the snapshot's name; they are a different kind.
        let labels = cycle_labels(source, &state.id);
        self.ctx
            .provisioner
            .ensure_volume(source, snapshot, spec, labels)
            .await?;

        let volume = snapshot.to_string();
        set_cycle(source, |c| c.working_volume = Some(volume));
        cycle::progress(&mut source.status, SourcePhase::Syncing, reasons::SYNC_IN_PROGRESS, "", now);
        cycle::persist(&self.ctx, source).await?;
        Ok(Step::Continue)
    }

    async fn syncing(
        &self,
        source: &mut ReplicationSource,
        state: &CycleState,
        volume: &str,
        builder: &dyn Builder,
    ) -> Result<Step> {
        let ctx = self.ctx.mover_context(&state.id, false);
        let mover = builder.from_source(&ctx, source, DataVolume::read_only(volume))?;
        let result = mover.synchronize().await?;

        let before = source.status.clone();
        source.status.apply_mover_status(result.status);
        let now = self.ctx.now();

        if !result.complete {
            cycle::progress(&mut source.status, SourcePhase::Syncing, reasons::SYNC_IN_PROGRESS, "", now);
            if source.status != before {
                cycle::persist(&self.ctx, source).await?;
            }
            let delay = result.retry_after.unwrap_or(self.ctx.intervals.poll);
            return Ok(Step::Done(Action::requeue(delay)));
        }

        debug!(cycle = %state.id, mover = mover.name(), "Transfer finished");
        set_cycle(source, |c| c.transferred = true);
        cycle::progress(&mut source.status, SourcePhase::Completing, reasons::SYNC_IN_PROGRESS, "", now);
        cycle::persist(&self.ctx, source).await?;
        Ok(Step::Continue)
    }

    async fn completing(
        &self,
        source: &mut ReplicationSource,
        state: &CycleState,
        builder: &dyn Builder,
    ) -> Result<Step> {
        let ctx = self.ctx.mover_context(&state.id, false);
        let data = state
            .working_volume
            .as_deref()
            .unwrap_or(&source.spec.source_pvc);
        let mover = builder.from_source(&ctx, source, DataVolume::read_only(data))?;
        mover.cleanup().await?;

        if let Some(volume) = self.transient_volume(source, state) {
            self.ctx
                .provisioner
                .release::<ReplicationSourceSpec, VolumeSpec>(source, volume)
                .await?;
        }

        let now = self.ctx.now();
        let trigger = source.spec.trigger.as_ref();
        let next_sync = trigger::next_sync_after(trigger, now)?;
        let latest = state
            .snapshot
            .as_deref()
            .map(TypedLocalObjectReference::snapshot);
        cycle::complete(&mut source.status, latest.clone(), next_sync, now);
        cycle::persist(&self.ctx, source).await?;

        let duration = source.status.last_sync_duration.unwrap_or_default();
        info!(cycle = %state.id, duration_secs = duration, "Replication cycle completed");
        self.ctx.events.publish(ReplicationEvent::SyncCompleted {
            kind: kind(),
            namespace: source.namespace().to_string(),
            name: source.name().to_string(),
            cycle_id: state.id.clone(),
            duration_secs: duration,
            latest_image: latest.map(|image| image.name),
        });

        cycle::prune(&self.ctx, source).await;

        Ok(Step::Done(cycle::after_completion(
            &self.ctx,
            source.spec.trigger.as_ref(),
            next_sync,
            now,
        )))
    }

    /// Paused sources do no new work; a transfer already running is
    /// suspended, not torn down.
    async fn pause(
        &self,
        source: &mut ReplicationSource,
        builder: &dyn Builder,
        pristine: &ReplicationStatus<SourcePhase>,
    ) -> Result<Action> {
        if let Some(state) = source.status.cycle.clone() {
            if let Stage::Syncing { volume } = Stage::of(&state) {
                let ctx = self.ctx.mover_context(&state.id, true);
                let mover = builder.from_source(&ctx, source, DataVolume::read_only(volume))?;
                let result = mover.synchronize().await?;
                source.status.apply_mover_status(result.status);
                if result.complete {
                    set_cycle(source, |c| c.transferred = true);
                }
            }
        }

        cycle::mark_paused(&mut source.status, self.ctx.now());
        if source.status != *pristine {
            cycle::persist(&self.ctx, source).await?;
        }
        debug!("Paused");
        Ok(Action::AwaitChange)
    }

    /// Best-effort release of what an abandoned cycle left behind.
    async fn discard(&self, source: &ReplicationSource, state: &CycleState) {
        if let Ok(builder) = self.ctx.registry.builder_for(&source.spec.mover) {
            let ctx = self.ctx.mover_context(&state.id, false);
            let data = state
                .working_volume
                .as_deref()
                .unwrap_or(&source.spec.source_pvc);
            match builder.from_source(&ctx, source, DataVolume::read_only(data)) {
                Ok(mover) => {
                    if let Err(e) = mover.cleanup().await {
                        warn!(error = %e, "Mover cleanup failed");
                    }
                }
                Err(e) => warn!(error = %e, "Could not rebuild mover for cleanup"),
            }
        }

        if let Some(volume) = self.transient_volume(source, state) {
            if let Err(e) = self
                .ctx
                .provisioner
                .release::<ReplicationSourceSpec, VolumeSpec>(source, volume)
                .await
            {
                warn!(volume, error = %e, "Could not release working volume");
            }
        }

        if let Some(snapshot) = state.snapshot.as_deref() {
            if cycle::latest_snapshot(&source.status) != Some(snapshot) {
                if let Err(e) = self
                    .ctx
                    .provisioner
                    .release::<ReplicationSourceSpec, VolumeSnapshotSpec>(source, snapshot)
                    .await
                {
                    warn!(snapshot, error = %e, "Could not release snapshot");
                }
            }
        }
    }

    /// The cycle's working volume, unless it is the source volume itself.
    fn transient_volume<'a>(
        &self,
        source: &ReplicationSource,
        state: &'a CycleState,
    ) -> Option<&'a str> {
        state
            .working_volume
            .as_deref()
            .filter(|volume| *volume != source.spec.source_pvc)
    }
}

fn kind() -> String {
    ReplicationSourceSpec::KIND.to_string()
}

fn set_cycle(source: &mut ReplicationSource, update: impl FnOnce(&mut CycleState)) {
    if let Some(state) = source.status.cycle.as_mut() {
        update(state);
    }
}

fn cycle_labels(source: &ReplicationSource, cycle_id: &str) -> BTreeMap<String, String> {
    let mut labels = owner_labels(source.uid(), Role::Source);
    labels.insert(LABEL_CYCLE.to_string(), cycle_id.to_string());
    labels
}
