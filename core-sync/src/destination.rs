//! # Destination Reconciler
//!
//! Drives a `ReplicationDestination` through its receive cycle:
//!
//! ```text
//! Idle ──trigger──> Provisioning ──> Receiving ──Snapshot──> Snapshotting ──┐
//!                                        └──Direct───────────────────────┐  │
//!                                                                        ▼  ▼
//!                                                   Idle <──────── Completing
//! ```
//!
//! The receiving volume outlives cycles: it is either the user's
//! `destinationPVC` or `volrep-dst-<name>`, provisioned once. With the
//! `Snapshot` copy method every cycle ends in a point-in-time snapshot of it,
//! published as `latestImage`; with `Direct` the volume itself is the image.

use core_api::{
    reasons, CopyMethod, CycleState, DestinationPhase, ReplicationDestination,
    ReplicationDestinationSpec, ReplicationStatus, ResourceSpec, TypedLocalObjectReference,
    VolumeSnapshotSpec, VolumeSpec,
};
use core_mover::{Builder, DataVolume};
use core_provision::naming::{cycle_child, owner_child, owner_labels};
use core_provision::{ProvisionError, Role};
use core_runtime::events::ReplicationEvent;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::context::{Action, SyncContext};
use crate::cycle;
use crate::error::{Result, SyncError};
use crate::trigger;

enum Stage<'a> {
    Provisioning,
    Receiving { volume: &'a str },
    Snapshotting { volume: &'a str },
    Completing { volume: &'a str },
}

impl<'a> Stage<'a> {
    fn of(cycle: &'a CycleState, copy_method: CopyMethod) -> Self {
        match cycle.working_volume.as_deref() {
            None => Stage::Provisioning,
            Some(volume) if !cycle.transferred => Stage::Receiving { volume },
            Some(volume) if copy_method == CopyMethod::Snapshot => Stage::Snapshotting { volume },
            Some(volume) => Stage::Completing { volume },
        }
    }
}

enum Step {
    Continue,
    Done(Action),
}

pub struct DestinationReconciler {
    ctx: SyncContext,
}

impl DestinationReconciler {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Run one pass for the named destination.
    #[instrument(skip(self), fields(kind = "ReplicationDestination"))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        let Some(mut destination) = self
            .ctx
            .client
            .get::<ReplicationDestinationSpec>(namespace, name)
            .await?
        else {
            debug!("Destination no longer exists");
            return Ok(Action::AwaitChange);
        };

        if destination.status.is_suspended(destination.generation()) {
            debug!(generation = destination.generation(), "Suspended until the spec changes");
            return Ok(Action::AwaitChange);
        }

        match self.run(&mut destination).await {
            Ok(action) => Ok(action),
            Err(err) => {
                let failure = cycle::record_failure::<ReplicationDestinationSpec, _>(
                    &self.ctx, namespace, name, err,
                )
                .await?;
                if let Some((destination, abandoned)) = failure.abandoned {
                    self.discard(&destination, &abandoned).await;
                }
                Ok(failure.action)
            }
        }
    }

    async fn run(&self, destination: &mut ReplicationDestination) -> Result<Action> {
        let pristine = destination.status.clone();
        let generation = destination.generation();
        cycle::observe(&mut destination.status, generation, self.ctx.now());

        let builder = self.validate(destination)?;

        if destination.spec.paused {
            return self.pause(destination, builder.as_ref(), &pristine).await;
        }

        let copy_method = destination.spec.volume.copy_method;
        loop {
            let step = match destination.status.cycle.clone() {
                None => self.idle(destination, &pristine).await?,
                Some(state) => match Stage::of(&state, copy_method) {
                    Stage::Provisioning => self.provisioning(destination).await?,
                    Stage::Receiving { volume } => {
                        self.receiving(destination, &state, volume, builder.as_ref())
                            .await?
                    }
                    Stage::Snapshotting { volume } => {
                        self.snapshotting(destination, &state, volume, builder.as_ref())
                            .await?
                    }
                    Stage::Completing { volume } => {
                        self.completing(destination, &state, volume, None, builder.as_ref())
                            .await?
                    }
                },
            };
            if let Step::Done(action) = step {
                return Ok(action);
            }
        }
    }

    fn validate(&self, destination: &ReplicationDestination) -> Result<Arc<dyn Builder>> {
        let builder = self.ctx.registry.builder_for(&destination.spec.mover)?;

        let options = &destination.spec.volume;
        if options.copy_method == CopyMethod::Clone {
            return Err(SyncError::invalid_spec(
                "copyMethod Clone is not supported for destinations",
            ));
        }
        if options.destination_pvc.is_none() && options.capacity.is_none() {
            return Err(SyncError::invalid_spec(
                "capacity is required when destinationPVC is not set",
            ));
        }

        let scratch = self.ctx.mover_context("", false);
        let volume = self.volume_name(destination);
        builder.from_destination(&scratch, destination, DataVolume::writable(volume))?;
        trigger::next_sync_after(destination.spec.trigger.as_ref(), self.ctx.now())?;
        Ok(builder)
    }

    /// The volume received data lands in.
    fn volume_name(&self, destination: &ReplicationDestination) -> String {
        destination
            .spec
            .volume
            .destination_pvc
            .clone()
            .unwrap_or_else(|| owner_child(Role::Destination, destination.name()))
    }

    async fn idle(
        &self,
        destination: &mut ReplicationDestination,
        pristine: &ReplicationStatus<DestinationPhase>,
    ) -> Result<Step> {
        let now = self.ctx.now();
        let evaluation = trigger::evaluate(
            destination.spec.trigger.as_ref(),
            &cycle::trigger_state(&destination.status),
            now,
        )?;

        if !evaluation.fire {
            cycle::wait_for_trigger(&mut destination.status, evaluation.next_sync, now);
            if destination.status != *pristine {
                cycle::persist(&self.ctx, destination).await?;
            }
            let action = match evaluation.next_sync {
                Some(next) => Action::requeue_at(next, now),
                None => Action::requeue(self.ctx.intervals.poll),
            };
            return Ok(Step::Done(action));
        }

        let id = cycle::begin(
            &mut destination.status,
            evaluation.manual_token,
            DestinationPhase::Provisioning,
            now,
        );
        let volume = self.volume_name(destination);
        cycle::progress(
            &mut destination.status,
            DestinationPhase::Provisioning,
            reasons::WAITING_FOR_VOLUME,
            format!("Waiting for volume {}", volume),
            now,
        );
        cycle::persist(&self.ctx, destination).await?;
        info!(cycle = %id, mover = %destination.spec.mover, "Receive cycle started");

        self.ctx.events.publish(ReplicationEvent::SyncStarted {
            kind: kind(),
            namespace: destination.namespace().to_string(),
            name: destination.name().to_string(),
            cycle_id: id,
            mover: destination.spec.mover.clone(),
        });
        Ok(Step::Continue)
    }

    async fn provisioning(&self, destination: &mut ReplicationDestination) -> Result<Step> {
        let options = &destination.spec.volume;
        let name = self.volume_name(destination);

        match &options.destination_pvc {
            Some(pvc) => {
                let exists = self
                    .ctx
                    .client
                    .get::<VolumeSpec>(destination.namespace(), pvc)
                    .await?
                    .is_some();
                if !exists {
                    return Err(ProvisionError::InvalidVolumeReference { name: pvc.clone() }.into());
                }
            }
            None => {
                let spec = VolumeSpec {
                    capacity: options.capacity.clone(),
                    storage_class_name: options.storage_class_name.clone(),
                    access_modes: options.access_modes.clone(),
                    data_source: None,
                };
                let labels = owner_labels(destination.uid(), Role::Destination);
                self.ctx
                    .provisioner
                    .ensure_volume(destination, &name, spec, labels)
                    .await?;
            }
        }

        if let Some(state) = destination.status.cycle.as_mut() {
            state.working_volume = Some(name);
        }
        cycle::progress(
            &mut destination.status,
            DestinationPhase::Receiving,
            reasons::SYNC_IN_PROGRESS,
            "",
            self.ctx.now(),
        );
        cycle::persist(&self.ctx, destination).await?;
        Ok(Step::Continue)
    }

    async fn receiving(
        &self,
        destination: &mut ReplicationDestination,
        state: &CycleState,
        volume: &str,
        builder: &dyn Builder,
    ) -> Result<Step> {
        let ctx = self.ctx.mover_context(&state.id, false);
        let mover = builder.from_destination(&ctx, destination, DataVolume::writable(volume))?;
        let result = mover.synchronize().await?;

        let before = destination.status.clone();
        destination.status.apply_mover_status(result.status);
        let now = self.ctx.now();

        if !result.complete {
            cycle::progress(
                &mut destination.status,
                DestinationPhase::Receiving,
                reasons::SYNC_IN_PROGRESS,
                "",
                now,
            );
            if destination.status != before {
                cycle::persist(&self.ctx, destination).await?;
            }
            let delay = result.retry_after.unwrap_or(self.ctx.intervals.poll);
            return Ok(Step::Done(Action::requeue(delay)));
        }

        debug!(cycle = %state.id, mover = mover.name(), "Data received");
        let next = match destination.spec.volume.copy_method {
            CopyMethod::Snapshot => DestinationPhase::Snapshotting,
            _ => DestinationPhase::Completing,
        };
        if let Some(state) = destination.status.cycle.as_mut() {
            state.transferred = true;
        }
        cycle::progress(&mut destination.status, next, reasons::SYNC_IN_PROGRESS, "", now);
        cycle::persist(&self.ctx, destination).await?;
        Ok(Step::Continue)
    }

    /// Capture the received data. Once the snapshot is ready the cycle
    /// completes in the same pass.
    async fn snapshotting(
        &self,
        destination: &mut ReplicationDestination,
        state: &CycleState,
        volume: &str,
        builder: &dyn Builder,
    ) -> Result<Step> {
        let snapshot = cycle_child(Role::Destination, destination.name(), &state.id);

        if state.snapshot.is_none() {
            self.ctx
                .snapshots
                .create_snapshot(
                    destination,
                    volume,
                    &snapshot,
                    destination.spec.volume.volume_snapshot_class_name.as_deref(),
                    Role::Destination,
                )
                .await?;
            if let Some(state) = destination.status.cycle.as_mut() {
                state.snapshot = Some(snapshot.clone());
            }
            cycle::persist(&self.ctx, destination).await?;
        }

        let ready = self
            .ctx
            .snapshots
            .await_ready(
                destination.namespace(),
                &snapshot,
                self.ctx.intervals.snapshot_ready_timeout,
            )
            .await?;

        if !ready {
            let before = destination.status.clone();
            cycle::progress(
                &mut destination.status,
                DestinationPhase::Snapshotting,
                reasons::WAITING_FOR_SNAPSHOT,
                format!("Waiting for snapshot {}", snapshot),
                self.ctx.now(),
            );
            if destination.status != before {
                cycle::persist(&self.ctx, destination).await?;
            }
            return Ok(Step::Done(Action::requeue(self.ctx.intervals.snapshot_poll)));
        }

        self.completing(destination, state, volume, Some(&snapshot), builder)
            .await
    }

    async fn completing(
        &self,
        destination: &mut ReplicationDestination,
        state: &CycleState,
        volume: &str,
        snapshot: Option<&str>,
        builder: &dyn Builder,
    ) -> Result<Step> {
        let ctx = self.ctx.mover_context(&state.id, false);
        let mover = builder.from_destination(&ctx, destination, DataVolume::writable(volume))?;
        mover.cleanup().await?;

        let latest = match snapshot {
            Some(snapshot) => TypedLocalObjectReference::snapshot(snapshot),
            None => TypedLocalObjectReference::volume(volume),
        };

        let now = self.ctx.now();
        let next_sync = trigger::next_sync_after(destination.spec.trigger.as_ref(), now)?;
        cycle::complete(&mut destination.status, Some(latest.clone()), next_sync, now);
        cycle::persist(&self.ctx, destination).await?;

        let duration = destination.status.last_sync_duration.unwrap_or_default();
        info!(
            cycle = %state.id,
            duration_secs = duration,
            latest_image = %latest.name,
            "Receive cycle completed"
        );
        self.ctx.events.publish(ReplicationEvent::SyncCompleted {
            kind: kind(),
            namespace: destination.namespace().to_string(),
            name: destination.name().to_string(),
            cycle_id: state.id.clone(),
            duration_secs: duration,
            latest_image: Some(latest.name),
        });

        cycle::prune(&self.ctx, destination).await;

        Ok(Step::Done(cycle::after_completion(
            &self.ctx,
            destination.spec.trigger.as_ref(),
            next_sync,
            now,
        )))
    }

    async fn pause(
        &self,
        destination: &mut ReplicationDestination,
        builder: &dyn Builder,
        pristine: &ReplicationStatus<DestinationPhase>,
    ) -> Result<Action> {
        if let Some(state) = destination.status.cycle.clone() {
            let copy_method = destination.spec.volume.copy_method;
            if let Stage::Receiving { volume } = Stage::of(&state, copy_method) {
                let ctx = self.ctx.mover_context(&state.id, true);
                let mover =
                    builder.from_destination(&ctx, destination, DataVolume::writable(volume))?;
                let result = mover.synchronize().await?;
                destination.status.apply_mover_status(result.status);
                if result.complete {
                    if let Some(state) = destination.status.cycle.as_mut() {
                        state.transferred = true;
                    }
                }
            }
        }

        cycle::mark_paused(&mut destination.status, self.ctx.now());
        if destination.status != *pristine {
            cycle::persist(&self.ctx, destination).await?;
        }
        debug!("Paused");
        Ok(Action::AwaitChange)
    }

    /// Best-effort release of what an abandoned cycle left behind. The
    /// receiving volume is kept.
    async fn discard(&self, destination: &ReplicationDestination, state: &CycleState) {
        if let Ok(builder) = self.ctx.registry.builder_for(&destination.spec.mover) {
            let ctx = self.ctx.mover_context(&state.id, false);
            let volume = state
                .working_volume
                .clone()
                .unwrap_or_else(|| self.volume_name(destination));
            match builder.from_destination(&ctx, destination, DataVolume::writable(volume)) {
                Ok(mover) => {
                    if let Err(e) = mover.cleanup().await {
                        warn!(error = %e, "Mover cleanup failed");
                    }
                }
                Err(e) => warn!(error = %e, "Could not rebuild mover for cleanup"),
            }
        }

        if let Some(snapshot) = state.snapshot.as_deref() {
            if cycle::latest_snapshot(&destination.status) != Some(snapshot) {
                if let Err(e) = self
                    .ctx
                    .provisioner
                    .release::<ReplicationDestinationSpec, VolumeSnapshotSpec>(destination, snapshot)
                    .await
                {
                    warn!(snapshot, error = %e, "Could not release snapshot");
                }
            }
        }
    }
}

fn kind() -> String {
    ReplicationDestinationSpec::KIND.to_string()
}
