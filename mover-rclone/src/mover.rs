use async_trait::async_trait;
use core_api::{JobSpec, JobVolume, Object, ResourceSpec};
use core_mover::{
    data_mount, DataVolume, JobProgress, Mover, MoverContext, MoverJob, MoverResult, Result,
    DATA_MOUNT_PATH,
};
use core_provision::Role;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::MOVER_NAME;

const CONFIG_MOUNT_PATH: &str = "/rclone-config";

/// Which way the bytes flow for this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Data volume to remote.
    Push,
    /// Remote to data volume.
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Push => f.write_str("source"),
            Direction::Pull => f.write_str("destination"),
        }
    }
}

/// Validated remote location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcloneTarget {
    pub config_secret: String,
    pub config_section: String,
    pub dest_path: String,
}

impl RcloneTarget {
    /// `section:path` as rclone addresses it.
    pub fn remote(&self) -> String {
        format!("{}:{}", self.config_section, self.dest_path)
    }
}

pub struct RcloneMover<O: ResourceSpec> {
    job: MoverJob<O>,
    direction: Direction,
    data: DataVolume,
    target: RcloneTarget,
    image: String,
    backoff_limit: u32,
    poll_interval: Duration,
}

impl<O: ResourceSpec> RcloneMover<O> {
    pub fn new(
        ctx: &MoverContext,
        owner: &Object<O>,
        role: Role,
        direction: Direction,
        data: DataVolume,
        target: RcloneTarget,
    ) -> Self {
        Self {
            job: MoverJob::new(ctx, owner, MOVER_NAME, role),
            direction,
            data,
            target,
            image: ctx.images.rclone.clone(),
            backoff_limit: ctx.job_backoff_limit,
            poll_interval: ctx.poll_interval,
        }
    }

    fn job_spec(&self, service_account: String) -> JobSpec {
        let env = BTreeMap::from([
            ("DIRECTION".to_string(), self.direction.to_string()),
            ("RCLONE_CONFIG".to_string(), format!("{}/rclone.conf", CONFIG_MOUNT_PATH)),
            ("RCLONE_CONFIG_SECTION".to_string(), self.target.config_section.clone()),
            ("RCLONE_DEST_PATH".to_string(), self.target.dest_path.clone()),
            ("MOUNT_PATH".to_string(), DATA_MOUNT_PATH.to_string()),
        ]);

        JobSpec {
            image: self.image.clone(),
            command: vec!["/mover-rclone/active.sh".to_string()],
            env,
            volumes: vec![
                data_mount(&self.data),
                JobVolume::secret("rclone-secret", &self.target.config_secret, CONFIG_MOUNT_PATH),
            ],
            service_account_name: service_account,
            backoff_limit: self.backoff_limit,
            parallelism: 1,
        }
    }
}

#[async_trait]
impl<O: ResourceSpec> Mover for RcloneMover<O> {
    fn name(&self) -> &str {
        MOVER_NAME
    }

    #[instrument(skip(self), fields(job = %self.job.name(), direction = %self.direction))]
    async fn synchronize(&self) -> Result<MoverResult> {
        let service_account = self.job.ensure_service_account().await?;
        debug!(remote = %self.target.remote(), "Running rclone sync");

        match self.job.run(self.job_spec(service_account)).await? {
            JobProgress::Succeeded => Ok(MoverResult::completed()),
            JobProgress::Running => Ok(MoverResult::in_progress(self.poll_interval)),
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.job.remove().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_memory::InMemoryObjectStore;
    use bridge_traits::SystemClock;
    use core_api::{Client, JobStatus, ReplicationDestinationSpec};
    use core_provision::Provisioner;
    use core_runtime::config::MoverImages;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pull_job() {
        let client = Client::new(Arc::new(InMemoryObjectStore::new()));
        let ctx = MoverContext {
            provisioner: Provisioner::new(client.clone()),
            clock: Arc::new(SystemClock),
            cycle_id: "c9".to_string(),
            images: MoverImages::default(),
            job_backoff_limit: 2,
            poll_interval: Duration::from_secs(5),
            paused: false,
        };
        let owner = client
            .create(&Object::new(
                "default",
                "db",
                ReplicationDestinationSpec {
                    mover: MOVER_NAME.to_string(),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();

        let target = RcloneTarget {
            config_secret: "rclone-conf".to_string(),
            config_section: "s3".to_string(),
            dest_path: "bucket/db".to_string(),
        };
        let mover = RcloneMover::new(
            &ctx,
            &owner,
            Role::Destination,
            Direction::Pull,
            DataVolume::writable("volrep-dst-db"),
            target,
        );

        assert!(!mover.synchronize().await.unwrap().complete);

        let mut job = client
            .get::<JobSpec>("default", "volrep-rclone-dst-db-c9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.spec.image, MoverImages::default().rclone);
        assert_eq!(job.spec.env["DIRECTION"], "destination");
        assert_eq!(job.spec.env["RCLONE_CONFIG_SECTION"], "s3");
        assert!(job
            .spec
            .volumes
            .iter()
            .any(|v| v.secret_name.as_deref() == Some("rclone-conf")));

        job.status = JobStatus {
            failed: 3,
            ..Default::default()
        };
        client.update_status(&job).await.unwrap();
        let err = mover.synchronize().await.unwrap_err();
        assert_eq!(err.reason(), "JobFailed");

        mover.cleanup().await.unwrap();
    }
}
