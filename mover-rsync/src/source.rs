//! Sending side: one pushing job per cycle.

use async_trait::async_trait;
use core_api::{JobSpec, JobVolume, ReplicationSource, ReplicationSourceSpec};
use core_mover::{data_mount, DataVolume, JobProgress, Mover, MoverContext, MoverJob, MoverResult, Result};
use core_provision::Role;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::MOVER_NAME;

pub struct RsyncSourceMover {
    job: MoverJob<ReplicationSourceSpec>,
    data: DataVolume,
    address: String,
    port: u16,
    key_secret: String,
    image: String,
    backoff_limit: u32,
    poll_interval: Duration,
}

impl RsyncSourceMover {
    pub fn new(
        ctx: &MoverContext,
        source: &ReplicationSource,
        data: DataVolume,
        address: String,
        port: u16,
        key_secret: String,
    ) -> Self {
        Self {
            job: MoverJob::new(ctx, source, MOVER_NAME, Role::Source),
            data,
            address,
            port,
            key_secret,
            image: ctx.images.rsync.clone(),
            backoff_limit: ctx.job_backoff_limit,
            poll_interval: ctx.poll_interval,
        }
    }

    fn job_spec(&self, service_account: String) -> JobSpec {
        let env = BTreeMap::from([
            ("DESTINATION_ADDRESS".to_string(), self.address.clone()),
            ("DESTINATION_PORT".to_string(), self.port.to_string()),
        ]);

        JobSpec {
            image: self.image.clone(),
            command: vec!["/mover-rsync/source.sh".to_string()],
            env,
            volumes: vec![
                data_mount(&self.data),
                JobVolume::secret("keys", &self.key_secret, "/keys"),
            ],
            service_account_name: service_account,
            backoff_limit: self.backoff_limit,
            parallelism: 1,
        }
    }
}

#[async_trait]
impl Mover for RsyncSourceMover {
    fn name(&self) -> &str {
        MOVER_NAME
    }

    #[instrument(skip(self), fields(job = %self.job.name()))]
    async fn synchronize(&self) -> Result<MoverResult> {
        let service_account = self.job.ensure_service_account().await?;
        debug!(address = %self.address, port = self.port, "Pushing to destination");

        match self.job.run(self.job_spec(service_account)).await? {
            JobProgress::Succeeded => Ok(MoverResult::completed()),
            JobProgress::Running => Ok(MoverResult::in_progress(self.poll_interval)),
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.job.remove().await
    }
}
