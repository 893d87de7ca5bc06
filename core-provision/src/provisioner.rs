//! # Resource Provisioner
//!
//! Idempotent create-or-adopt for the transient objects a replication cycle
//! needs.
//!
//! ## Overview
//!
//! Every `ensure_*` operation follows the same steps:
//!
//! 1. Look the child up by its deterministic name.
//! 2. Absent: create it with a controller owner reference to the parent, so
//!    the platform garbage collects it with the parent. A concurrent creator
//!    winning the race (`AlreadyExists`) is handled by adopting its object.
//! 3. Present: require that the parent controls it (`NotOwned` otherwise),
//!    then reconcile only the fields that are safe to change in place.
//!
//! Re-entrant calls with the same desired state converge on one object and
//! perform no write on the second call.
//!
//! ## Safe fields
//!
//! | Kind           | Reconciled in place                 |
//! |----------------|-------------------------------------|
//! | Volume         | labels                              |
//! | Secret         | labels (data is never rewritten)    |
//! | ServiceAccount | labels                              |
//! | Service        | labels, type, port, selector        |
//! | Job            | labels, parallelism                 |

use core_api::{
    Client, Job, JobSpec, Object, ResourceSpec, Secret, SecretSpec, Service, ServiceAccount,
    ServiceAccountSpec, ServiceSpec, Volume, VolumeSnapshot, VolumeSnapshotSpec, VolumeSpec,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

use crate::error::{ProvisionError, Result};
use crate::naming::LABEL_ROLE;

/// Create-or-adopt operations over a typed [`Client`].
#[derive(Clone)]
pub struct Provisioner {
    client: Client,
}

impl Provisioner {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Ensure a volume exists. Its spec is never changed once created.
    pub async fn ensure_volume<O: ResourceSpec>(
        &self,
        owner: &Object<O>,
        name: &str,
        spec: VolumeSpec,
        labels: BTreeMap<String, String>,
    ) -> Result<Volume> {
        self.ensure(owner, name, spec, labels, |_, _| false).await
    }

    /// Ensure a snapshot request exists. Snapshots are immutable.
    pub async fn ensure_volume_snapshot<O: ResourceSpec>(
        &self,
        owner: &Object<O>,
        name: &str,
        spec: VolumeSnapshotSpec,
        labels: BTreeMap<String, String>,
    ) -> Result<VolumeSnapshot> {
        self.ensure(owner, name, spec, labels, |_, _| false).await
    }

    /// Ensure a secret exists. Existing data is left as is.
    pub async fn ensure_secret<O: ResourceSpec>(
        &self,
        owner: &Object<O>,
        name: &str,
        data: BTreeMap<String, String>,
        labels: BTreeMap<String, String>,
    ) -> Result<Secret> {
        self.ensure(owner, name, SecretSpec { data }, labels, |_, _| false)
            .await
    }

    pub async fn ensure_service_account<O: ResourceSpec>(
        &self,
        owner: &Object<O>,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<ServiceAccount> {
        self.ensure(owner, name, ServiceAccountSpec {}, labels, |_, _| false)
            .await
    }

    pub async fn ensure_service<O: ResourceSpec>(
        &self,
        owner: &Object<O>,
        name: &str,
        spec: ServiceSpec,
        labels: BTreeMap<String, String>,
    ) -> Result<Service> {
        self.ensure(owner, name, spec, labels, |existing, desired| {
            if existing.spec == *desired {
                return false;
            }
            existing.spec.service_type = desired.service_type;
            existing.spec.port = desired.port;
            existing.spec.selector = desired.selector.clone();
            true
        })
        .await
    }

    /// Ensure the mover job `name` exists for `owner`.
    ///
    /// Jobs are grouped by the `volrep.io/role` label in `labels`: while
    /// another non-terminal job of the same owner and role exists, no new job
    /// is created (`JobInFlight`). Two or more such jobs is reported as
    /// `MultipleJobsInFlight` and left alone.
    #[instrument(skip(self, owner, spec, labels), fields(owner = %owner.name()))]
    pub async fn ensure_job<O: ResourceSpec>(
        &self,
        owner: &Object<O>,
        name: &str,
        spec: JobSpec,
        labels: BTreeMap<String, String>,
    ) -> Result<Job> {
        let role = labels.get(LABEL_ROLE).cloned();
        let others: Vec<String> = self
            .client
            .list_owned::<JobSpec>(owner.namespace(), owner.uid())
            .await?
            .into_iter()
            .filter(|job| job.name() != name)
            .filter(|job| job.metadata.labels.get(LABEL_ROLE) == role.as_ref())
            .filter(|job| !job.is_terminal())
            .map(|job| job.metadata.name)
            .collect();

        if others.len() > 1 {
            warn!(jobs = ?others, "Found more than one running mover job");
            return Err(ProvisionError::MultipleJobsInFlight {
                owner: owner.key().to_string(),
                jobs: others,
            });
        }

        if let Some(running) = others.into_iter().next() {
            // Our own job already exists alongside the old one: two in flight.
            if self.client.get::<JobSpec>(owner.namespace(), name).await?.is_some() {
                return Err(ProvisionError::MultipleJobsInFlight {
                    owner: owner.key().to_string(),
                    jobs: vec![running, name.to_string()],
                });
            }
            debug!(running = %running, "Waiting for previous mover job");
            return Err(ProvisionError::JobInFlight {
                owner: owner.key().to_string(),
                running,
            });
        }

        self.ensure(owner, name, spec, labels, |existing, desired| {
            if existing.spec.parallelism == desired.parallelism {
                return false;
            }
            existing.spec.parallelism = desired.parallelism;
            true
        })
        .await
    }

    /// Delete a child controlled by `owner`.
    ///
    /// Returns `false` when the child is already gone. A child controlled by
    /// anyone else is never touched.
    pub async fn release<O: ResourceSpec, S: ResourceSpec>(
        &self,
        owner: &Object<O>,
        name: &str,
    ) -> Result<bool> {
        let Some(existing) = self.client.get::<S>(owner.namespace(), name).await? else {
            return Ok(false);
        };
        if !existing.metadata.is_controlled_by(owner.uid()) {
            return Err(not_owned::<O, S>(owner, name));
        }

        let deleted = self.client.delete::<S>(owner.namespace(), name).await?;
        if deleted {
            debug!(kind = S::KIND, name, "Released child object");
        }
        Ok(deleted)
    }

    /// Shared create-or-adopt. `reconcile` patches the safe fields of the
    /// existing object from the desired spec and reports whether it changed
    /// anything.
    async fn ensure<O, S, F>(
        &self,
        owner: &Object<O>,
        name: &str,
        spec: S,
        labels: BTreeMap<String, String>,
        reconcile: F,
    ) -> Result<Object<S>>
    where
        O: ResourceSpec,
        S: ResourceSpec,
        F: FnOnce(&mut Object<S>, &S) -> bool,
    {
        let namespace = owner.namespace();

        let existing = match self.client.get::<S>(namespace, name).await? {
            Some(existing) => existing,
            None => {
                let mut desired = Object::new(namespace, name, spec.clone());
                desired.metadata.labels = labels.clone();
                desired
                    .metadata
                    .owner_references
                    .push(owner.controller_reference());

                match self.client.create(&desired).await {
                    Ok(created) => {
                        info!(kind = S::KIND, name, owner = %owner.name(), "Created child object");
                        return Ok(created);
                    }
                    Err(e) if e.is_already_exists() => {
                        debug!(kind = S::KIND, name, "Lost creation race, adopting");
                        self.client
                            .get::<S>(namespace, name)
                            .await?
                            .ok_or_else(|| ProvisionError::Api(e))?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if !existing.metadata.is_controlled_by(owner.uid()) {
            return Err(not_owned::<O, S>(owner, name));
        }

        let mut patched = existing.clone();
        let labels_changed = merge_labels(&mut patched.metadata.labels, &labels);
        let spec_changed = reconcile(&mut patched, &spec);

        if !labels_changed && !spec_changed {
            return Ok(existing);
        }

        debug!(kind = S::KIND, name, labels_changed, spec_changed, "Reconciling child object");
        Ok(self.client.update(&patched).await?)
    }
}

fn merge_labels(current: &mut BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> bool {
    let mut changed = false;
    for (key, value) in desired {
        if current.get(key) != Some(value) {
            current.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

fn not_owned<O: ResourceSpec, S: ResourceSpec>(owner: &Object<O>, name: &str) -> ProvisionError {
    warn!(kind = S::KIND, name, owner = %owner.name(), "Child exists without our owner reference");
    ProvisionError::NotOwned {
        kind: S::KIND.to_string(),
        name: format!("{}/{}", owner.namespace(), name),
        owner: owner.key().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{owner_labels, Role};
    use bridge_memory::InMemoryObjectStore;
    use core_api::{JobStatus, ServiceType};
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn setup() -> (Provisioner, Volume) {
        let client = Client::new(Arc::new(InMemoryObjectStore::new()));
        let owner = client
            .create(&Object::new("default", "owner", VolumeSpec::default()))
            .await
            .unwrap();
        (Provisioner::new(client), owner)
    }

    fn job_spec() -> JobSpec {
        JobSpec {
            image: "mover".to_string(),
            parallelism: 1,
            backoff_limit: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ensure_secret_twice_returns_same_object() {
        let (provisioner, owner) = setup().await;
        let data = BTreeMap::from([("psk".to_string(), "one".to_string())]);

        let first = provisioner
            .ensure_secret(&owner, "key", data, BTreeMap::new())
            .await
            .unwrap();
        let changed = BTreeMap::from([("psk".to_string(), "two".to_string())]);
        let second = provisioner
            .ensure_secret(&owner, "key", changed, BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(first.uid(), second.uid());
        assert_eq!(first.metadata.resource_version, second.metadata.resource_version);
        assert_eq!(second.spec.data.get("psk").map(String::as_str), Some("one"));
        assert!(second.metadata.is_controlled_by(owner.uid()));
    }

    #[tokio::test]
    async fn test_foreign_child_is_not_owned() {
        let (provisioner, owner) = setup().await;
        provisioner
            .client()
            .create(&Object::new("default", "taken", VolumeSpec::default()))
            .await
            .unwrap();

        let err = provisioner
            .ensure_volume(&owner, "taken", VolumeSpec::default(), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(err.reason(), "NotOwned");
    }

    #[tokio::test]
    async fn test_service_reconciles_port() {
        let (provisioner, owner) = setup().await;
        let mut spec = ServiceSpec {
            service_type: ServiceType::ClusterIP,
            port: 8000,
            selector: BTreeMap::new(),
        };
        let created = provisioner
            .ensure_service(&owner, "svc", spec.clone(), BTreeMap::new())
            .await
            .unwrap();

        spec.port = 9000;
        let updated = provisioner
            .ensure_service(&owner, "svc", spec, BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(created.uid(), updated.uid());
        assert_eq!(updated.spec.port, 9000);
    }

    #[tokio::test]
    async fn test_job_in_flight_blocks_new_job() {
        let (provisioner, owner) = setup().await;
        let labels = owner_labels(owner.uid(), Role::Source);

        provisioner
            .ensure_job(&owner, "job-1", job_spec(), labels.clone())
            .await
            .unwrap();

        let err = provisioner
            .ensure_job(&owner, "job-2", job_spec(), labels.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::JobInFlight { ref running, .. } if running == "job-1"));
        assert!(err.is_transient());

        // Once the first job finished the next one may start.
        let mut first = provisioner
            .client()
            .get::<JobSpec>("default", "job-1")
            .await
            .unwrap()
            .unwrap();
        first.status = JobStatus {
            succeeded: 1,
            ..Default::default()
        };
        provisioner.client().update_status(&first).await.unwrap();

        provisioner
            .ensure_job(&owner, "job-2", job_spec(), labels)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_ensure_converges_on_one_job() {
        let (provisioner, owner) = setup().await;
        let labels = owner_labels(owner.uid(), Role::Source);

        let attempts = (0..8).map(|_| provisioner.ensure_job(&owner, "job", job_spec(), labels.clone()));
        let uids: HashSet<String> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap().metadata.uid)
            .collect();

        assert_eq!(uids.len(), 1);
        let jobs = provisioner
            .client()
            .list_owned::<JobSpec>("default", owner.uid())
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_job_parallelism_reconciled() {
        let (provisioner, owner) = setup().await;
        let labels = owner_labels(owner.uid(), Role::Source);
        provisioner
            .ensure_job(&owner, "job", job_spec(), labels.clone())
            .await
            .unwrap();

        let mut suspended = job_spec();
        suspended.parallelism = 0;
        suspended.image = "ignored".to_string();
        let job = provisioner
            .ensure_job(&owner, "job", suspended, labels)
            .await
            .unwrap();
        assert_eq!(job.spec.parallelism, 0);
        assert_eq!(job.spec.image, "mover");
    }

    #[tokio::test]
    async fn test_release_only_owned() {
        let (provisioner, owner) = setup().await;
        provisioner
            .ensure_volume(&owner, "work", VolumeSpec::default(), BTreeMap::new())
            .await
            .unwrap();

        assert!(provisioner.release::<_, VolumeSpec>(&owner, "work").await.unwrap());
        assert!(!provisioner.release::<_, VolumeSpec>(&owner, "work").await.unwrap());

        provisioner
            .client()
            .create(&Object::new("default", "user-data", VolumeSpec::default()))
            .await
            .unwrap();
        assert!(provisioner
            .release::<_, VolumeSpec>(&owner, "user-data")
            .await
            .is_err());
    }
}
