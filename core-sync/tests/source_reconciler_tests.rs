mod common;

use common::*;
use core_api::{reasons, ConditionType, CopyMethod, JobSpec, SourcePhase};
use core_provision::naming::cycle_child;
use core_provision::Role;
use core_runtime::ReplicationEvent;
use core_sync::Action;
use std::time::Duration;

#[tokio::test]
async fn test_continuous_sync_scenario() {
    let h = Harness::new();
    h.create_volume("data", "1Gi").await;
    h.create_source("db", rsync_source("data", None)).await;
    let mut events = h.subscribe();
    let reconciler = h.sources();

    // Pass 1: cycle recorded, snapshot requested, waiting on it
    let action = reconciler.reconcile(NS, "db").await.unwrap();
    assert_eq!(action, Action::Requeue(h.ctx.intervals.snapshot_poll));
    let status = h.source("db").await.status;
    assert_eq!(status.phase, SourcePhase::Snapshotting);
    let cycle = status.cycle.clone().unwrap();
    let snapshot = cycle_child(Role::Source, "db", &cycle.id);
    assert_eq!(cycle.snapshot.as_deref(), Some(snapshot.as_str()));
    assert_eq!(
        status.condition(ConditionType::Synchronizing).unwrap().reason,
        reasons::WAITING_FOR_SNAPSHOT
    );

    // Pass 2: snapshot ready, restored, mover job started
    h.ready_snapshots().await;
    let action = reconciler.reconcile(NS, "db").await.unwrap();
    assert!(matches!(action, Action::Requeue(_)));
    assert_eq!(h.source("db").await.status.phase, SourcePhase::Syncing);
    assert!(h.volume_exists(&snapshot).await);
    assert_eq!(h.jobs().await.len(), 1);

    // Pass 3: job done, cycle completes and the next one is due at once
    h.advance_minutes(3);
    h.finish_jobs().await;
    let action = reconciler.reconcile(NS, "db").await.unwrap();
    assert_eq!(action, Action::Requeue(Duration::ZERO));

    let status = h.source("db").await.status;
    assert_eq!(status.phase, SourcePhase::Idle);
    assert!(status.cycle.is_none());
    assert_eq!(status.last_sync_time, Some(t0() + chrono::Duration::minutes(3)));
    assert_eq!(status.last_sync_duration, Some(180));
    assert_eq!(status.latest_image.as_ref().unwrap().name, snapshot);
    assert!(status.is_condition_true(ConditionType::Reconciled));
    assert!(!status.is_condition_true(ConditionType::Error));

    // Transient children are gone, the image stays
    assert!(h.jobs().await.is_empty());
    assert!(!h.volume_exists(&snapshot).await);
    assert_eq!(h.snapshots("source").await, vec![snapshot]);

    let events = drain(&mut events);
    assert!(matches!(events.first(), Some(ReplicationEvent::SyncStarted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ReplicationEvent::SyncCompleted { duration_secs: 180, .. })));

    // Continuous: the next pass starts a new cycle right away
    reconciler.reconcile(NS, "db").await.unwrap();
    assert!(h.source("db").await.status.cycle.is_some());
}

#[tokio::test]
async fn test_hourly_schedule_scenario() {
    let h = Harness::new();
    h.create_volume("data", "1Gi").await;
    h.create_source("db", rsync_source("data", schedule("@every 1h"))).await;
    let reconciler = h.sources();

    // Never synced: fires at T0
    reconciler.reconcile(NS, "db").await.unwrap();
    assert!(h.source("db").await.status.cycle.is_some());

    h.ready_snapshots().await;
    reconciler.reconcile(NS, "db").await.unwrap();
    h.finish_jobs().await;

    // Completes at T0+5m, next run an hour after completion
    h.advance_minutes(5);
    let action = reconciler.reconcile(NS, "db").await.unwrap();
    let status = h.source("db").await.status;
    assert_eq!(status.last_sync_time, Some(t0() + chrono::Duration::minutes(5)));
    assert_eq!(status.next_sync_time, Some(t0() + chrono::Duration::minutes(65)));
    assert_eq!(action, Action::Requeue(Duration::from_secs(60 * 60)));

    // T0+30m: nothing to do
    h.advance_minutes(25);
    let action = reconciler.reconcile(NS, "db").await.unwrap();
    assert_eq!(action, Action::Requeue(Duration::from_secs(35 * 60)));
    let status = h.source("db").await.status;
    assert!(status.cycle.is_none());
    assert_eq!(
        status.condition(ConditionType::Synchronizing).unwrap().reason,
        reasons::WAITING_FOR_TRIGGER
    );

    // T0+65m: fires again
    h.advance_minutes(35);
    reconciler.reconcile(NS, "db").await.unwrap();
    assert!(h.source("db").await.status.cycle.is_some());
}

#[tokio::test]
async fn test_unknown_backend_suspends_until_spec_changes() {
    let h = Harness::new();
    h.create_volume("data", "1Gi").await;
    let mut spec = rsync_source("data", None);
    spec.mover = "unknownbackend".to_string();
    h.create_source("db", spec).await;
    let mut events = h.subscribe();
    let reconciler = h.sources();

    let action = reconciler.reconcile(NS, "db").await.unwrap();
    assert_eq!(action, Action::AwaitChange);

    let source = h.source("db").await;
    assert_eq!(source.status.phase, SourcePhase::Error);
    assert_eq!(source.status.suspended_generation, Some(1));
    let error = source.status.condition(ConditionType::Error).unwrap();
    assert_eq!(error.reason, "UnknownMoverKind");
    assert!(source.status.cycle.is_none());
    assert!(h.snapshots("source").await.is_empty());
    assert!(matches!(
        drain(&mut events).as_slice(),
        [ReplicationEvent::ConfigurationError { generation: 1, .. }]
    ));

    // No retry while the generation is unchanged
    h.advance_minutes(30);
    assert_eq!(reconciler.reconcile(NS, "db").await.unwrap(), Action::AwaitChange);
    let again = h.source("db").await;
    assert_eq!(again.metadata.resource_version, source.metadata.resource_version);

    // Fixing the spec resumes work
    h.update_source("db", |spec| spec.mover = "rsync".to_string()).await;
    reconciler.reconcile(NS, "db").await.unwrap();
    let fixed = h.source("db").await;
    assert_eq!(fixed.status.suspended_generation, None);
    assert_eq!(fixed.status.observed_generation, Some(2));
    assert!(fixed.status.cycle.is_some());
    assert!(!fixed.status.is_condition_true(ConditionType::Error));
}

#[tokio::test]
async fn test_incomplete_mover_section_is_permanent() {
    let h = Harness::new();
    h.create_volume("data", "1Gi").await;
    let mut spec = rsync_source("data", None);
    spec.rsync = None;
    h.create_source("db", spec).await;

    let action = h.sources().reconcile(NS, "db").await.unwrap();
    assert_eq!(action, Action::AwaitChange);
    let status = h.source("db").await.status;
    assert_eq!(status.condition(ConditionType::Error).unwrap().reason, "InvalidSpec");
    assert!(status.cycle.is_none());
}

#[tokio::test]
async fn test_missing_source_volume_is_permanent() {
    let h = Harness::new();
    h.create_source("db", rsync_source("nope", None)).await;

    let action = h.sources().reconcile(NS, "db").await.unwrap();
    assert_eq!(action, Action::AwaitChange);
    let status = h.source("db").await.status;
    assert_eq!(status.phase, SourcePhase::Error);
    assert_eq!(
        status.condition(ConditionType::Error).unwrap().reason,
        "InvalidVolumeReference"
    );
    // The cycle is kept and resumes once the spec points at a real volume
    assert!(status.cycle.is_some());
    h.create_volume("data", "1Gi").await;
    h.update_source("db", |spec| spec.source_pvc = "data".to_string()).await;
    h.sources().reconcile(NS, "db").await.unwrap();
    let status = h.source("db").await.status;
    assert_eq!(status.phase, SourcePhase::Snapshotting);
}

#[tokio::test]
async fn test_malformed_schedule_is_permanent() {
    let h = Harness::new();
    h.create_volume("data", "1Gi").await;
    h.create_source("db", rsync_source("data", schedule("every tuesday"))).await;

    assert_eq!(h.sources().reconcile(NS, "db").await.unwrap(), Action::AwaitChange);
    let status = h.source("db").await.status;
    assert_eq!(status.condition(ConditionType::Error).unwrap().reason, "InvalidSchedule");
}

#[tokio::test]
async fn test_retention_keeps_latest_images() {
    let h = Harness::new();
    h.create_volume("data", "1Gi").await;
    let mut spec = rsync_source("data", None);
    spec.retain = Some(2);
    h.create_source("db", spec).await;

    for _ in 0..4 {
        h.advance_minutes(1);
        h.run_source_cycle("db").await;
    }

    let remaining = h.snapshots("source").await;
    assert_eq!(remaining.len(), 2);
    let latest = h.source("db").await.status.latest_image.unwrap();
    assert!(latest.is_snapshot());
    assert!(remaining.contains(&latest.name));
}

#[tokio::test]
async fn test_manual_trigger_fires_once_per_token() {
    let h = Harness::new();
    h.create_volume("data", "1Gi").await;
    h.create_source("db", rsync_source("data", manual("first"))).await;

    let action = h.run_source_cycle("db").await;
    assert_eq!(action, Action::Requeue(h.ctx.intervals.poll));
    assert_eq!(
        h.source("db").await.status.last_manual_sync.as_deref(),
        Some("first")
    );

    // Same token: nothing new
    h.advance_minutes(10);
    let action = h.sources().reconcile(NS, "db").await.unwrap();
    assert_eq!(action, Action::Requeue(h.ctx.intervals.poll));
    assert!(h.source("db").await.status.cycle.is_none());

    // New token: one more cycle
    h.update_source("db", |spec| spec.trigger = manual("second")).await;
    h.run_source_cycle("db").await;
    assert_eq!(
        h.source("db").await.status.last_manual_sync.as_deref(),
        Some("second")
    );
}

#[tokio::test]
async fn test_failed_job_abandons_cycle() {
    let h = Harness::new();
    h.create_volume("data", "1Gi").await;
    h.create_source("db", rsync_source("data", manual("go"))).await;
    let mut events = h.subscribe();
    let reconciler = h.sources();

    reconciler.reconcile(NS, "db").await.unwrap();
    h.ready_snapshots().await;
    reconciler.reconcile(NS, "db").await.unwrap();
    let cycle = h.source("db").await.status.cycle.unwrap();
    let snapshot = cycle.snapshot.clone().unwrap();

    h.fail_jobs().await;
    h.advance_minutes(2);
    let action = reconciler.reconcile(NS, "db").await.unwrap();
    assert_eq!(action, Action::Requeue(h.ctx.intervals.failure_retry));

    let status = h.source("db").await.status;
    assert_eq!(status.phase, SourcePhase::Error);
    assert!(status.cycle.is_none());
    assert_eq!(status.last_failure_time, Some(t0() + chrono::Duration::minutes(2)));
    assert_eq!(status.last_manual_sync.as_deref(), Some("go"));
    assert_eq!(status.suspended_generation, None);
    assert_eq!(status.condition(ConditionType::Error).unwrap().reason, "JobFailed");
    assert!(status.last_sync_time.is_none());

    // Cleanup of the abandoned cycle
    assert!(h.jobs().await.is_empty());
    assert!(!h.volume_exists(&snapshot).await);
    assert!(h.snapshots("source").await.is_empty());

    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ReplicationEvent::SyncFailed { cycle_id: Some(id), .. } if *id == cycle.id
    )));

    // The consumed token does not fire again
    reconciler.reconcile(NS, "db").await.unwrap();
    assert!(h.source("db").await.status.cycle.is_none());
}

#[tokio::test]
async fn test_paused_source_does_no_work() {
    let h = Harness::new();
    h.create_volume("data", "1Gi").await;
    let mut spec = rsync_source("data", None);
    spec.paused = true;
    h.create_source("db", spec).await;

    let action = h.sources().reconcile(NS, "db").await.unwrap();
    assert_eq!(action, Action::AwaitChange);
    let status = h.source("db").await.status;
    assert!(status.cycle.is_none());
    let sync = status.condition(ConditionType::Synchronizing).unwrap();
    assert_eq!(sync.reason, reasons::PAUSED);
    assert!(h.snapshots("source").await.is_empty());
}

#[tokio::test]
async fn test_pausing_suspends_running_job() {
    let h = Harness::new();
    h.create_volume("data", "1Gi").await;
    h.create_source("db", rsync_source("data", None)).await;
    let reconciler = h.sources();

    reconciler.reconcile(NS, "db").await.unwrap();
    h.ready_snapshots().await;
    reconciler.reconcile(NS, "db").await.unwrap();
    assert_eq!(h.jobs().await[0].spec.parallelism, 1);

    h.update_source("db", |spec| spec.paused = true).await;
    assert_eq!(reconciler.reconcile(NS, "db").await.unwrap(), Action::AwaitChange);

    let jobs = h.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].spec.parallelism, 0);
    assert_eq!(h.source("db").await.status.phase, SourcePhase::Syncing);

    // Unpausing resumes the same job
    h.update_source("db", |spec| spec.paused = false).await;
    reconciler.reconcile(NS, "db").await.unwrap();
    let resumed = h.jobs().await;
    assert_eq!(resumed[0].metadata.name, jobs[0].metadata.name);
    assert_eq!(resumed[0].spec.parallelism, 1);
}

#[tokio::test]
async fn test_direct_copy_reads_source_volume() {
    let h = Harness::new();
    h.create_volume("data", "1Gi").await;
    let mut spec = rsync_source("data", None);
    spec.volume.copy_method = CopyMethod::Direct;
    h.create_source("db", spec).await;

    h.sources().reconcile(NS, "db").await.unwrap();
    let status = h.source("db").await.status;
    assert_eq!(status.phase, SourcePhase::Syncing);
    assert_eq!(
        status.cycle.unwrap().working_volume.as_deref(),
        Some("data")
    );
    let job = &h.jobs().await[0];
    assert!(job
        .spec
        .volumes
        .iter()
        .any(|v| v.claim_name.as_deref() == Some("data") && v.read_only));

    h.finish_jobs().await;
    h.sources().reconcile(NS, "db").await.unwrap();
    let status = h.source("db").await.status;
    assert!(status.latest_image.is_none());
    // The source volume is never released
    assert!(h.volume_exists("data").await);
}

#[tokio::test]
async fn test_clone_copy_uses_temporary_volume() {
    let h = Harness::new();
    h.create_volume("data", "5Gi").await;
    let mut spec = rsync_source("data", None);
    spec.volume.copy_method = CopyMethod::Clone;
    h.create_source("db", spec).await;

    h.sources().reconcile(NS, "db").await.unwrap();
    let cycle = h.source("db").await.status.cycle.unwrap();
    let clone = cycle.working_volume.clone().unwrap();
    assert_eq!(clone, cycle_child(Role::Source, "db", &cycle.id));

    let volume = h
        .client
        .get::<core_api::VolumeSpec>(NS, &clone)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(volume.spec.capacity.as_deref(), Some("5Gi"));
    assert_eq!(volume.spec.data_source.unwrap().name, "data");

    h.finish_jobs().await;
    h.sources().reconcile(NS, "db").await.unwrap();
    assert!(!h.volume_exists(&clone).await);
    assert!(h.source("db").await.status.cycle.is_none());
}

#[tokio::test]
async fn test_deleted_source_is_ignored() {
    let h = Harness::new();
    assert_eq!(h.sources().reconcile(NS, "gone").await.unwrap(), Action::AwaitChange);
    assert!(h.client.list::<JobSpec>(Some(NS)).await.unwrap().is_empty());
}
