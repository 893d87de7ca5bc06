//! Backup side.

use async_trait::async_trait;
use bridge_traits::Clock;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use core_api::{
    JobSpec, JobVolume, MoverStatus, ReplicationSource, ReplicationSourceSpec,
    ResticRetainPolicy, ResticSourceSpec, ResticStatus,
};
use core_mover::{
    data_mount, DataVolume, JobProgress, Mover, MoverContext, MoverJob, MoverResult, Result,
};
use core_provision::Role;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::{CACHE_DIR, DEFAULT_PRUNE_INTERVAL_DAYS, MOVER_NAME, REPOSITORY_MOUNT_PATH};

const PRUNE_ENV: &str = "PRUNE";

/// Render a retain policy as `restic forget` flags.
pub fn forget_options(policy: &ResticRetainPolicy) -> String {
    let counts = [
        ("--keep-hourly", policy.hourly),
        ("--keep-daily", policy.daily),
        ("--keep-weekly", policy.weekly),
        ("--keep-monthly", policy.monthly),
        ("--keep-yearly", policy.yearly),
    ];

    let mut options: Vec<String> = counts
        .iter()
        .filter_map(|(flag, count)| count.map(|c| format!("{} {}", flag, c)))
        .collect();
    if let Some(within) = policy.within.as_ref().filter(|w| !w.is_empty()) {
        options.push(format!("--keep-within {}", within));
    }
    options.join(" ")
}

pub struct ResticSourceMover {
    job: MoverJob<ReplicationSourceSpec>,
    clock: Arc<dyn Clock>,
    data: DataVolume,
    repository: String,
    spec: ResticSourceSpec,
    last_pruned: Option<DateTime<Utc>>,
    image: String,
    backoff_limit: u32,
    poll_interval: Duration,
}

impl ResticSourceMover {
    pub fn new(
        ctx: &MoverContext,
        source: &ReplicationSource,
        data: DataVolume,
        repository: String,
        spec: ResticSourceSpec,
    ) -> Self {
        Self {
            job: MoverJob::new(ctx, source, MOVER_NAME, Role::Source),
            clock: ctx.clock.clone(),
            data,
            repository,
            spec,
            last_pruned: source.status.restic.as_ref().and_then(|r| r.last_pruned),
            image: ctx.images.restic.clone(),
            backoff_limit: ctx.job_backoff_limit,
            poll_interval: ctx.poll_interval,
        }
    }

    fn prune_due(&self, now: DateTime<Utc>) -> bool {
        let days = self
            .spec
            .prune_interval_days
            .unwrap_or(DEFAULT_PRUNE_INTERVAL_DAYS);
        match self.last_pruned {
            None => true,
            Some(last) => now - last >= ChronoDuration::days(i64::from(days)),
        }
    }

    fn job_spec(&self, service_account: String, prune: bool) -> JobSpec {
        let mut env = BTreeMap::from([
            ("DIRECTION".to_string(), "source".to_string()),
            ("RESTIC_CACHE_DIR".to_string(), CACHE_DIR.to_string()),
            (PRUNE_ENV.to_string(), prune.to_string()),
        ]);
        if let Some(policy) = &self.spec.retain {
            env.insert("FORGET_OPTIONS".to_string(), forget_options(policy));
        }

        JobSpec {
            image: self.image.clone(),
            command: vec!["/mover-restic/entry.sh".to_string()],
            env,
            volumes: vec![
                data_mount(&self.data),
                JobVolume::secret("repository", &self.repository, REPOSITORY_MOUNT_PATH),
            ],
            service_account_name: service_account,
            backoff_limit: self.backoff_limit,
            parallelism: 1,
        }
    }
}

#[async_trait]
impl Mover for ResticSourceMover {
    fn name(&self) -> &str {
        MOVER_NAME
    }

    #[instrument(skip(self), fields(job = %self.job.name()))]
    async fn synchronize(&self) -> Result<MoverResult> {
        // The prune decision is fixed when the job is created.
        let prune = match self.job.existing().await? {
            Some(job) => job.spec.env.get(PRUNE_ENV).map_or(false, |v| v == "true"),
            None => self.prune_due(self.clock.now()),
        };

        let service_account = self.job.ensure_service_account().await?;
        debug!(prune, "Running restic backup");

        match self.job.run(self.job_spec(service_account, prune)).await? {
            JobProgress::Running => Ok(MoverResult::in_progress(self.poll_interval)),
            JobProgress::Succeeded if prune => {
                let now = self.clock.now();
                info!(pruned_at = %now, "Repository pruned");
                Ok(MoverResult::completed().with_status(MoverStatus {
                    rsync: None,
                    restic: Some(ResticStatus {
                        last_pruned: Some(now),
                    }),
                }))
            }
            JobProgress::Succeeded => Ok(MoverResult::completed()),
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.job.remove().await
    }
}
