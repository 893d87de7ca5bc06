//! Restore side.

use async_trait::async_trait;
use chrono::SecondsFormat;
use core_api::{
    JobSpec, JobVolume, ReplicationDestination, ReplicationDestinationSpec, ResticDestinationSpec,
};
use core_mover::{
    data_mount, DataVolume, JobProgress, Mover, MoverContext, MoverJob, MoverResult, Result,
};
use core_provision::Role;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::{CACHE_DIR, MOVER_NAME, REPOSITORY_MOUNT_PATH};

pub struct ResticDestinationMover {
    job: MoverJob<ReplicationDestinationSpec>,
    data: DataVolume,
    repository: String,
    spec: ResticDestinationSpec,
    image: String,
    backoff_limit: u32,
    poll_interval: Duration,
}

impl ResticDestinationMover {
    pub fn new(
        ctx: &MoverContext,
        destination: &ReplicationDestination,
        data: DataVolume,
        repository: String,
        spec: ResticDestinationSpec,
    ) -> Self {
        Self {
            job: MoverJob::new(ctx, destination, MOVER_NAME, Role::Destination),
            data,
            repository,
            spec,
            image: ctx.images.restic.clone(),
            backoff_limit: ctx.job_backoff_limit,
            poll_interval: ctx.poll_interval,
        }
    }

    fn job_spec(&self, service_account: String) -> JobSpec {
        let mut env = BTreeMap::from([
            ("DIRECTION".to_string(), "destination".to_string()),
            ("RESTIC_CACHE_DIR".to_string(), CACHE_DIR.to_string()),
            (
                "SELECT_PREVIOUS".to_string(),
                self.spec.previous.unwrap_or(0).to_string(),
            ),
        ]);
        if let Some(as_of) = self.spec.restore_as_of {
            env.insert(
                "RESTORE_AS_OF".to_string(),
                as_of.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
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
impl Mover for ResticDestinationMover {
    fn name(&self) -> &str {
        MOVER_NAME
    }

    #[instrument(skip(self), fields(job = %self.job.name()))]
    async fn synchronize(&self) -> Result<MoverResult> {
        let service_account = self.job.ensure_service_account().await?;
        debug!(previous = ?self.spec.previous, as_of = ?self.spec.restore_as_of, "Running restic restore");

        match self.job.run(self.job_spec(service_account)).await? {
            JobProgress::Succeeded => Ok(MoverResult::completed()),
            JobProgress::Running => Ok(MoverResult::in_progress(self.poll_interval)),
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.job.remove().await
    }
}
