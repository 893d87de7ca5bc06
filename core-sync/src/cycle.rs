//! Status bookkeeping shared by the source and destination state machines.
//!
//! Both kinds carry a [`ReplicationStatus`] and move through the same cycle
//! lifecycle: begin, report progress, complete or fail. The per-kind
//! reconcilers only decide *what* happens inside a cycle.

use chrono::{DateTime, Utc};
use core_api::{
    reasons, ConditionType, CycleState, DestinationPhase, Object, ReplicationDestinationSpec,
    ReplicationSourceSpec, ReplicationStatus, ResourceSpec, SourcePhase, TriggerSpec,
    TypedLocalObjectReference,
};
use core_provision::Role;
use core_runtime::events::ReplicationEvent;
use std::fmt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::context::{Action, SyncContext};
use crate::error::{ErrorClass, Result, SyncError};
use crate::trigger::{self, TriggerState};

/// Phase enum of a state machine.
pub(crate) trait Phase: Copy + PartialEq + fmt::Display + Send + Sync {
    const IDLE: Self;
    const ERROR: Self;
}

impl Phase for SourcePhase {
    const IDLE: Self = SourcePhase::Idle;
    const ERROR: Self = SourcePhase::Error;
}

impl Phase for DestinationPhase {
    const IDLE: Self = DestinationPhase::Idle;
    const ERROR: Self = DestinationPhase::Error;
}

/// A replicated kind: something with a trigger and a mover.
pub(crate) trait Replicated: ResourceSpec {
    const ROLE: Role;

    fn trigger(&self) -> Option<&TriggerSpec>;
    fn mover(&self) -> &str;
    fn retain(&self) -> u32;
}

impl Replicated for ReplicationSourceSpec {
    const ROLE: Role = Role::Source;

    fn trigger(&self) -> Option<&TriggerSpec> {
        self.trigger.as_ref()
    }

    fn mover(&self) -> &str {
        &self.mover
    }

    fn retain(&self) -> u32 {
        ReplicationSourceSpec::retain(self)
    }
}

impl Replicated for ReplicationDestinationSpec {
    const ROLE: Role = Role::Destination;

    fn trigger(&self) -> Option<&TriggerSpec> {
        self.trigger.as_ref()
    }

    fn mover(&self) -> &str {
        &self.mover
    }

    fn retain(&self) -> u32 {
        ReplicationDestinationSpec::retain(self)
    }
}

/// Cycle ids sort by start time and stay unique within a second.
pub(crate) fn new_cycle_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%d%H%M%S"), &suffix[..6])
}

pub(crate) fn trigger_state<P>(status: &ReplicationStatus<P>) -> TriggerState<'_> {
    TriggerState {
        last_sync_time: status.last_sync_time,
        last_failure_time: status.last_failure_time,
        last_manual_sync: status.last_manual_sync.as_deref(),
    }
}

/// Record the generation being acted on and lift a suspension the spec
/// change made obsolete.
pub(crate) fn observe<P: Phase>(status: &mut ReplicationStatus<P>, generation: i64, now: DateTime<Utc>) {
    status.observed_generation = Some(generation);
    if status
        .suspended_generation
        .map_or(false, |suspended| suspended != generation)
    {
        debug!(generation, "Spec changed, lifting suspension");
        status.suspended_generation = None;
        if status.cycle.is_none() && status.phase == P::ERROR {
            status.phase = P::IDLE;
        }
        status.set_condition(ConditionType::Error, false, reasons::NO_ERROR, "", now);
    }
}

/// Start a cycle. Returns its id.
pub(crate) fn begin<P: Phase>(
    status: &mut ReplicationStatus<P>,
    manual_token: Option<String>,
    first: P,
    now: DateTime<Utc>,
) -> String {
    let id = new_cycle_id(now);
    status.cycle = Some(CycleState {
        id: id.clone(),
        started_at: now,
        manual_token,
        snapshot: None,
        working_volume: None,
        transferred: false,
    });
    status.phase = first;
    status.last_sync_start_time = Some(now);
    status.set_condition(
        ConditionType::Synchronizing,
        true,
        reasons::SYNC_IN_PROGRESS,
        format!("Cycle {} started", id),
        now,
    );
    id
}

/// Report a cycle still in `phase`, waiting on `reason`.
pub(crate) fn progress<P: Phase>(
    status: &mut ReplicationStatus<P>,
    phase: P,
    reason: &str,
    message: impl Into<String>,
    now: DateTime<Utc>,
) {
    status.phase = phase;
    status.set_condition(ConditionType::Synchronizing, true, reason, message, now);
}

pub(crate) fn wait_for_trigger<P: Phase>(
    status: &mut ReplicationStatus<P>,
    next_sync: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) {
    if status.phase != P::ERROR {
        status.phase = P::IDLE;
    }
    status.next_sync_time = next_sync;
    status.set_condition(
        ConditionType::Synchronizing,
        false,
        reasons::WAITING_FOR_TRIGGER,
        "",
        now,
    );
}

pub(crate) fn mark_paused<P: Phase>(status: &mut ReplicationStatus<P>, now: DateTime<Utc>) {
    status.set_condition(
        ConditionType::Synchronizing,
        false,
        reasons::PAUSED,
        "Replication is paused",
        now,
    );
}

/// Close the cycle in flight as successful.
pub(crate) fn complete<P: Phase>(
    status: &mut ReplicationStatus<P>,
    latest_image: Option<TypedLocalObjectReference>,
    next_sync: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) {
    status.record_sync(now);
    status.next_sync_time = next_sync;
    if latest_image.is_some() {
        status.latest_image = latest_image;
    }
    if let Some(token) = status.cycle.take().and_then(|c| c.manual_token) {
        status.last_manual_sync = Some(token);
    }
    status.phase = P::IDLE;
    status.retries = 0;
    status.set_condition(
        ConditionType::Synchronizing,
        false,
        reasons::WAITING_FOR_TRIGGER,
        "",
        now,
    );
    status.set_condition(ConditionType::Reconciled, true, reasons::RECONCILED, "", now);
    status.set_condition(ConditionType::Error, false, reasons::NO_ERROR, "", now);
}

fn record_error<P: Phase>(status: &mut ReplicationStatus<P>, err: &SyncError, now: DateTime<Utc>) {
    let message = err.to_string();
    status.set_condition(ConditionType::Error, true, err.reason(), message.clone(), now);
    status.set_condition(ConditionType::Reconciled, false, err.reason(), message.clone(), now);
    status.set_condition(ConditionType::Synchronizing, false, err.reason(), message, now);
}

/// Abandon the cycle after a retryable failure. The manual token that
/// started it is consumed; the next trigger starts afresh.
pub(crate) fn abandon<P: Phase>(
    status: &mut ReplicationStatus<P>,
    err: &SyncError,
    next_sync: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<CycleState> {
    let cycle = status.cycle.take();
    if let Some(token) = cycle.as_ref().and_then(|c| c.manual_token.clone()) {
        status.last_manual_sync = Some(token);
    }
    status.last_failure_time = Some(now);
    status.next_sync_time = next_sync;
    status.phase = P::ERROR;
    status.retries = 0;
    record_error(status, err, now);
    cycle
}

/// Park the resource until its spec changes. The cycle in flight is kept so
/// a corrected spec resumes it.
pub(crate) fn suspend<P: Phase>(
    status: &mut ReplicationStatus<P>,
    generation: i64,
    err: &SyncError,
    now: DateTime<Utc>,
) {
    status.suspended_generation = Some(generation);
    status.phase = P::ERROR;
    status.retries = 0;
    record_error(status, err, now);
}

/// Count a transient failure. Returns the new retry count.
pub(crate) fn note_transient<P: Phase>(
    status: &mut ReplicationStatus<P>,
    err: &SyncError,
    now: DateTime<Utc>,
) -> u32 {
    status.retries = status.retries.saturating_add(1);
    status.set_condition(
        ConditionType::Reconciled,
        false,
        reasons::RETRYING,
        err.to_string(),
        now,
    );
    status.retries
}

/// Name of the latest image when it is a snapshot; pruning never deletes it.
pub(crate) fn latest_snapshot<P>(status: &ReplicationStatus<P>) -> Option<&str> {
    status
        .latest_image
        .as_ref()
        .filter(|image| image.is_snapshot())
        .map(|image| image.name.as_str())
}

/// Write the status, picking up the new resource version.
pub(crate) async fn persist<S>(ctx: &SyncContext, object: &mut Object<S>) -> Result<()>
where
    S: ResourceSpec,
{
    *object = ctx.client.update_status(object).await?;
    Ok(())
}

/// Outcome of [`record_failure`].
pub(crate) struct Failure<S: ResourceSpec> {
    pub action: Action,
    /// Fresh copy of the object and the cycle a retryable failure abandoned,
    /// for the caller's best-effort cleanup.
    pub abandoned: Option<(Object<S>, CycleState)>,
}

/// Classify `err` and record it on a fresh copy of the object.
pub(crate) async fn record_failure<S, P>(
    ctx: &SyncContext,
    namespace: &str,
    name: &str,
    err: SyncError,
) -> Result<Failure<S>>
where
    S: Replicated<Status = ReplicationStatus<P>>,
    P: Phase,
{
    let Some(mut object) = ctx.client.get::<S>(namespace, name).await? else {
        return Ok(Failure {
            action: Action::AwaitChange,
            abandoned: None,
        });
    };
    let now = ctx.now();
    let generation = object.generation();
    let class = err.class();

    if class.suspends() {
        suspend(&mut object.status, generation, &err, now);
        error!(
            generation,
            reason = err.reason(),
            error = %err,
            "Suspending until the spec changes"
        );
        persist(ctx, &mut object).await?;

        ctx.events.publish(ReplicationEvent::ConfigurationError {
            kind: S::KIND.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            generation,
            reason: err.reason().to_string(),
            message: err.to_string(),
        });

        return Ok(Failure {
            action: Action::AwaitChange,
            abandoned: None,
        });
    }

    if class == ErrorClass::Transient {
        let retries = note_transient(&mut object.status, &err, now);
        let delay = ctx.intervals.backoff(retries);
        debug!(error = %err, retries, ?delay, "Transient failure, backing off");
        if let Err(write) = ctx.client.update_status(&object).await {
            debug!(error = %write, "Could not record retry count");
        }
        return Ok(Failure {
            action: Action::requeue(delay),
            abandoned: None,
        });
    }

    let next_sync = trigger::next_sync_after(object.spec.trigger(), now)
        .ok()
        .flatten();
    let abandoned = abandon(&mut object.status, &err, next_sync, now);
    let cycle_id = abandoned.as_ref().map(|c| c.id.clone());
    warn!(
        cycle = ?cycle_id,
        reason = err.reason(),
        error = %err,
        "Replication cycle failed"
    );
    persist(ctx, &mut object).await?;

    ctx.events.publish(ReplicationEvent::SyncFailed {
        kind: S::KIND.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        cycle_id,
        reason: err.reason().to_string(),
        message: err.to_string(),
    });

    Ok(Failure {
        action: Action::requeue(ctx.intervals.failure_retry),
        abandoned: abandoned.map(|cycle| (object, cycle)),
    })
}

/// Delete snapshots beyond the retention count and report what went.
pub(crate) async fn prune<S, P>(ctx: &SyncContext, object: &Object<S>) -> Vec<String>
where
    S: Replicated<Status = ReplicationStatus<P>>,
{
    let keep = latest_snapshot(&object.status);
    match ctx
        .snapshots
        .prune(object, S::ROLE, object.spec.retain(), keep)
        .await
    {
        Ok(deleted) => {
            if !deleted.is_empty() {
                ctx.events.publish(ReplicationEvent::SnapshotsPruned {
                    kind: S::KIND.to_string(),
                    namespace: object.namespace().to_string(),
                    name: object.name().to_string(),
                    deleted: deleted.clone(),
                });
            }
            deleted
        }
        Err(e) => {
            warn!(error = %e, "Snapshot pruning failed, will retry after the next cycle");
            Vec::new()
        }
    }
}

/// Requeue after a completed cycle.
pub(crate) fn after_completion(
    ctx: &SyncContext,
    trigger: Option<&TriggerSpec>,
    next_sync: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Action {
    if trigger::Evaluation::is_continuous(trigger) {
        return Action::requeue(std::time::Duration::ZERO);
    }
    match next_sync {
        Some(at) => Action::requeue_at(at, now),
        None => Action::requeue(ctx.intervals.poll),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use core_api::ConditionStatus;
    use core_mover::MoverError;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn job_failed() -> SyncError {
        MoverError::JobFailed {
            job: "volrep-rsync-src-db".to_string(),
            message: "exit 12".to_string(),
        }
        .into()
    }

    #[test]
    fn test_cycle_ids_are_unique_and_ordered() {
        let a = new_cycle_id(t0());
        let b = new_cycle_id(t0());
        assert_ne!(a, b);
        assert!(a.starts_with("20240101000000-"));
        assert!(new_cycle_id(t0() + chrono::Duration::seconds(1)) > a);
    }

    #[test]
    fn test_complete_consumes_manual_token() {
        let mut status = ReplicationStatus::<SourcePhase>::default();
        begin(&mut status, Some("once".to_string()), SourcePhase::Triggered, t0());
        assert!(status.is_condition_true(ConditionType::Synchronizing));

        let done = t0() + chrono::Duration::minutes(5);
        complete(
            &mut status,
            Some(TypedLocalObjectReference::snapshot("snap")),
            None,
            done,
        );
        assert_eq!(status.phase, SourcePhase::Idle);
        assert_eq!(status.last_manual_sync.as_deref(), Some("once"));
        assert_eq!(status.last_sync_time, Some(done));
        assert_eq!(status.last_sync_duration, Some(300));
        assert_eq!(latest_snapshot(&status), Some("snap"));
        assert!(status.cycle.is_none());
        assert!(status.is_condition_true(ConditionType::Reconciled));
    }

    #[test]
    fn test_abandon_records_failure() {
        let mut status = ReplicationStatus::<DestinationPhase>::default();
        begin(&mut status, Some("t".to_string()), DestinationPhase::Provisioning, t0());
        status.retries = 3;

        let cycle = abandon(&mut status, &job_failed(), None, t0()).unwrap();
        assert_eq!(cycle.manual_token.as_deref(), Some("t"));
        assert_eq!(status.last_manual_sync.as_deref(), Some("t"));
        assert_eq!(status.last_failure_time, Some(t0()));
        assert_eq!(status.phase, DestinationPhase::Error);
        assert_eq!(status.retries, 0);
        let error = status.condition(ConditionType::Error).unwrap();
        assert_eq!(error.status, ConditionStatus::True);
        assert_eq!(error.reason, "JobFailed");
    }

    #[test]
    fn test_suspension_lifts_on_new_generation() {
        let mut status = ReplicationStatus::<SourcePhase>::default();
        let err: SyncError = MoverError::UnknownMoverKind {
            name: "unknownbackend".to_string(),
        }
        .into();
        suspend(&mut status, 1, &err, t0());
        assert!(status.is_suspended(1));

        observe(&mut status, 1, t0());
        assert!(status.is_suspended(1));

        observe(&mut status, 2, t0());
        assert!(!status.is_suspended(2));
        assert_eq!(status.phase, SourcePhase::Idle);
        assert!(!status.is_condition_true(ConditionType::Error));
        assert_eq!(status.observed_generation, Some(2));
    }

    #[test]
    fn test_wait_keeps_error_phase() {
        let mut status = ReplicationStatus::<SourcePhase>::default();
        abandon(&mut status, &job_failed(), None, t0());
        wait_for_trigger(&mut status, Some(t0()), t0());
        assert_eq!(status.phase, SourcePhase::Error);
        assert_eq!(status.next_sync_time, Some(t0()));
    }
}
