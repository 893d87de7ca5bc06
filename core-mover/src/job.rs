//! # Mover Jobs
//!
//! Every backend runs its transfer tool as one job per cycle. [`MoverJob`]
//! holds the naming, labelling and status interpretation they share, so a
//! backend only decides what goes into the [`JobSpec`].
//!
//! ```text
//! ensure_job ──> active ──> succeeded  => JobProgress::Succeeded
//!                   │
//!                   └──> failed > backoffLimit => MoverError::JobFailed
//! ```

use core_api::{Job, JobSpec, JobVolume, Object, ResourceSpec};
use core_provision::naming::{mover_child, mover_cycle_child, owner_labels, LABEL_CYCLE, LABEL_MOVER};
use core_provision::{Provisioner, Role};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{MoverError, Result};
use crate::mover::{DataVolume, MoverContext};

/// Mount point of the replicated data inside every mover container.
pub const DATA_MOUNT_PATH: &str = "/data";

/// Mount the cycle's data volume at [`DATA_MOUNT_PATH`].
pub fn data_mount(data: &DataVolume) -> JobVolume {
    JobVolume::claim("data", &data.name, DATA_MOUNT_PATH, data.read_only)
}

/// Where a cycle's job stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProgress {
    Running,
    Succeeded,
}

/// The job and service identity of one mover cycle.
pub struct MoverJob<O: ResourceSpec> {
    provisioner: Provisioner,
    owner: Object<O>,
    mover: &'static str,
    role: Role,
    cycle_id: String,
    name: String,
    paused: bool,
}

impl<O: ResourceSpec> MoverJob<O> {
    pub fn new(ctx: &MoverContext, owner: &Object<O>, mover: &'static str, role: Role) -> Self {
        Self {
            provisioner: ctx.provisioner.clone(),
            owner: owner.clone(),
            mover,
            role,
            cycle_id: ctx.cycle_id.clone(),
            name: mover_cycle_child(mover, role, owner.name(), &ctx.cycle_id),
            paused: ctx.paused,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &Object<O> {
        &self.owner
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// Labels carried by every object of this mover cycle.
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = owner_labels(self.owner.uid(), self.role);
        labels.insert(LABEL_MOVER.to_string(), self.mover.to_string());
        labels.insert(LABEL_CYCLE.to_string(), self.cycle_id.clone());
        labels
    }

    /// Name shared by the per-owner objects of this mover (service account,
    /// key secret, service).
    pub fn owner_object_name(&self) -> String {
        mover_child(self.mover, self.role, self.owner.name())
    }

    /// Ensure the per-owner service account jobs run as.
    pub async fn ensure_service_account(&self) -> Result<String> {
        let name = self.owner_object_name();
        let mut labels = owner_labels(self.owner.uid(), self.role);
        labels.insert(LABEL_MOVER.to_string(), self.mover.to_string());

        self.provisioner
            .ensure_service_account(&self.owner, &name, labels)
            .await?;
        Ok(name)
    }

    /// The cycle's job as it stands, if it was created already.
    pub async fn existing(&self) -> Result<Option<Job>> {
        Ok(self
            .provisioner
            .client()
            .get::<JobSpec>(self.owner.namespace(), &self.name)
            .await?)
    }

    /// Ensure the cycle's job exists and report its progress. A paused owner
    /// gets its job suspended (parallelism 0) rather than deleted.
    pub async fn run(&self, mut spec: JobSpec) -> Result<JobProgress> {
        if self.paused {
            spec.parallelism = 0;
        }
        let job = self
            .provisioner
            .ensure_job(&self.owner, &self.name, spec, self.labels())
            .await?;

        if job.is_succeeded() {
            info!(job = %self.name, mover = self.mover, "Mover job succeeded");
            return Ok(JobProgress::Succeeded);
        }

        if job.is_failed() {
            warn!(job = %self.name, failed = job.status.failed, "Mover job failed");
            return Err(MoverError::JobFailed {
                job: self.name.clone(),
                message: format!(
                    "{} attempts failed (backoff limit {})",
                    job.status.failed, job.spec.backoff_limit
                ),
            });
        }

        debug!(job = %self.name, active = job.status.active, "Mover job running");
        Ok(JobProgress::Running)
    }

    /// Delete the cycle's job if it exists.
    pub async fn remove(&self) -> Result<()> {
        self.provisioner
            .release::<O, JobSpec>(&self.owner, &self.name)
            .await?;
        Ok(())
    }
}
