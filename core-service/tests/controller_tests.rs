//! The controller loop against the in-memory platform, in real time with
//! short intervals.

use bridge_memory::{InMemoryObjectStore, ManualClock};
use chrono::{TimeZone, Utc};
use core_api::{
    Client, CopyMethod, JobSpec, Object, ReplicationSourceSpec, RsyncSourceSpec, SourcePhase,
    TriggerSpec, VolumeSpec,
};
use core_mover::RegistryBuilder;
use core_runtime::events::ControllerEvent;
use core_runtime::{ControllerConfig, CoreEvent, ReplicationEvent};
use core_service::CoreService;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;

const NS: &str = "default";

fn service() -> (CoreService, Client) {
    let clock = Arc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ));
    let store = Arc::new(InMemoryObjectStore::with_clock(clock.clone()));
    let config = ControllerConfig::builder()
        .object_store(store)
        .clock(clock)
        .workers(2)
        .poll_interval(Duration::from_millis(20))
        .snapshot_poll_interval(Duration::from_millis(10))
        .backoff_base(Duration::from_millis(10))
        .backoff_max(Duration::from_millis(100))
        .failure_retry_interval(Duration::from_millis(50))
        .build()
        .unwrap();

    let mut registry = RegistryBuilder::new();
    mover_rsync::register(&mut registry).unwrap();
    let service = CoreService::new(config, Arc::new(registry.build())).unwrap();
    let client = service.context().client.clone();
    (service, client)
}

fn manual_source(token: &str) -> ReplicationSourceSpec {
    let mut spec = ReplicationSourceSpec {
        source_pvc: "data".to_string(),
        mover: "rsync".to_string(),
        trigger: Some(TriggerSpec {
            schedule: None,
            manual: Some(token.to_string()),
        }),
        rsync: Some(RsyncSourceSpec {
            address: Some("10.0.0.12".to_string()),
            port: None,
            key_secret: Some("volrep-rsync-key".to_string()),
        }),
        ..Default::default()
    };
    spec.volume.copy_method = CopyMethod::Direct;
    spec
}

async fn create_volume(client: &Client) {
    let spec = VolumeSpec {
        capacity: Some("1Gi".to_string()),
        ..Default::default()
    };
    client.create(&Object::new(NS, "data", spec)).await.unwrap();
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Plays the platform: every running job exits successfully.
async fn finish_jobs(client: &Client) -> bool {
    let mut finished = false;
    for mut job in client.list::<JobSpec>(Some(NS)).await.unwrap() {
        if !job.is_terminal() {
            job.status.succeeded = 1;
            job.status.completion_time = Some(Utc::now());
            client.update_status(&job).await.unwrap();
            finished = true;
        }
    }
    finished
}

async fn next_replication_event(events: &mut Receiver<CoreEvent>) -> ReplicationEvent {
    loop {
        if let CoreEvent::Replication(event) = events.recv().await.unwrap() {
            return event;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_runs_cycle_and_stops() {
    let (service, client) = service();
    create_volume(&client).await;
    client
        .create(&Object::new(NS, "db", manual_source("first")))
        .await
        .unwrap();
    let mut events = service.subscribe();

    let shutdown = CancellationToken::new();
    let controller = tokio::spawn(service.controller(shutdown.clone()).run());

    match events.recv().await.unwrap() {
        CoreEvent::Controller(ControllerEvent::Started { workers, movers }) => {
            assert_eq!(workers, 2);
            assert_eq!(movers, vec!["rsync".to_string()]);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(
        next_replication_event(&mut events).await,
        ReplicationEvent::SyncStarted { .. }
    ));

    let c = &client;
    eventually(|| finish_jobs(c)).await;
    eventually(|| async move {
        let source = c
            .get::<ReplicationSourceSpec>(NS, "db")
            .await
            .unwrap()
            .unwrap();
        source.status.last_manual_sync.as_deref() == Some("first")
    })
    .await;

    let source = client
        .get::<ReplicationSourceSpec>(NS, "db")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source.status.phase, SourcePhase::Idle);
    assert!(source.status.last_sync_time.is_some());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), controller)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let mut stopped = false;
    while let Ok(event) = events.try_recv() {
        stopped |= matches!(event, CoreEvent::Controller(ControllerEvent::Stopped));
    }
    assert!(stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_picks_up_spec_fix() {
    let (service, client) = service();
    create_volume(&client).await;
    let mut spec = manual_source("first");
    spec.mover = "unknown".to_string();
    client.create(&Object::new(NS, "db", spec)).await.unwrap();

    let shutdown = CancellationToken::new();
    let controller = tokio::spawn(service.controller(shutdown.clone()).run());

    let c = &client;
    eventually(|| async move {
        let source = c
            .get::<ReplicationSourceSpec>(NS, "db")
            .await
            .unwrap()
            .unwrap();
        source.status.suspended_generation == Some(1)
    })
    .await;

    let mut source = client
        .get::<ReplicationSourceSpec>(NS, "db")
        .await
        .unwrap()
        .unwrap();
    source.spec.mover = "rsync".to_string();
    client.update(&source).await.unwrap();

    eventually(|| async move {
        let source = c
            .get::<ReplicationSourceSpec>(NS, "db")
            .await
            .unwrap()
            .unwrap();
        source.status.phase == SourcePhase::Syncing
    })
    .await;

    shutdown.cancel();
    controller.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_controller_stops_without_resources() {
    let (service, _client) = service();
    let shutdown = CancellationToken::new();
    let controller = service.controller(shutdown.clone());
    assert!(!controller.shutdown_token().is_cancelled());

    let handle = tokio::spawn(controller.run());
    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
