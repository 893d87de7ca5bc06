//! Receiving side: key secret, service and one listening job per cycle.

use async_trait::async_trait;
use core_api::{
    JobSpec, JobVolume, MoverStatus, ReplicationDestination, ReplicationDestinationSpec,
    RsyncDestinationSpec, RsyncStatus, ServiceSpec,
};
use core_mover::{
    data_mount, DataVolume, JobProgress, Mover, MoverContext, MoverJob, MoverResult, Result,
};
use core_provision::naming::{LABEL_MOVER, LABEL_OWNER_UID};
use core_provision::Role;
use core_runtime::logging::redact_if_sensitive;
use rand::RngCore;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::{DEFAULT_PORT, MOVER_NAME, PSK_KEY};

const PSK_BYTES: usize = 32;

pub struct RsyncDestinationMover {
    job: MoverJob<ReplicationDestinationSpec>,
    data: DataVolume,
    spec: RsyncDestinationSpec,
    image: String,
    backoff_limit: u32,
    poll_interval: Duration,
}

impl RsyncDestinationMover {
    pub fn new(
        ctx: &MoverContext,
        destination: &ReplicationDestination,
        data: DataVolume,
        spec: RsyncDestinationSpec,
    ) -> Self {
        Self {
            job: MoverJob::new(ctx, destination, MOVER_NAME, Role::Destination),
            data,
            spec,
            image: ctx.images.rsync.clone(),
            backoff_limit: ctx.job_backoff_limit,
            poll_interval: ctx.poll_interval,
        }
    }

    fn port(&self) -> u16 {
        self.spec.port.unwrap_or(DEFAULT_PORT)
    }

    /// Labels the listener pods carry and the service selects on.
    fn selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_OWNER_UID.to_string(), self.job.owner().uid().to_string()),
            (LABEL_MOVER.to_string(), MOVER_NAME.to_string()),
        ])
    }

    /// The user-provided key secret, or one generated for this destination.
    async fn ensure_key_secret(&self) -> Result<String> {
        if let Some(name) = self.spec.key_secret.as_ref().filter(|n| !n.is_empty()) {
            return Ok(name.clone());
        }

        let name = self.job.owner_object_name();
        let psk = generate_psk();
        debug!(secret = %name, psk = %redact_if_sensitive("psk", &psk), "Ensuring key secret");

        let data = BTreeMap::from([(PSK_KEY.to_string(), format!("volrep:{}", psk))]);
        self.job
            .provisioner()
            .ensure_secret(self.job.owner(), &name, data, self.selector())
            .await?;
        Ok(name)
    }

    /// Ensure the service and return the address assigned to it, if any yet.
    async fn ensure_service(&self) -> Result<Option<String>> {
        let spec = ServiceSpec {
            service_type: self.spec.service_type.unwrap_or_default(),
            port: self.port(),
            selector: self.selector(),
        };
        let service = self
            .job
            .provisioner()
            .ensure_service(
                self.job.owner(),
                &self.job.owner_object_name(),
                spec,
                self.selector(),
            )
            .await?;
        Ok(service.address().map(str::to_string))
    }

    fn job_spec(&self, service_account: String, key_secret: &str) -> JobSpec {
        let env = BTreeMap::from([("LISTEN_PORT".to_string(), self.port().to_string())]);

        JobSpec {
            image: self.image.clone(),
            command: vec!["/mover-rsync/destination.sh".to_string()],
            env,
            volumes: vec![
                data_mount(&self.data),
                JobVolume::secret("keys", key_secret, "/keys"),
            ],
            service_account_name: service_account,
            backoff_limit: self.backoff_limit,
            parallelism: 1,
        }
    }
}

fn generate_psk() -> String {
    let mut key = [0u8; PSK_BYTES];
    rand::thread_rng().fill_bytes(&mut key);
    hex::encode(key)
}

#[async_trait]
impl Mover for RsyncDestinationMover {
    fn name(&self) -> &str {
        MOVER_NAME
    }

    #[instrument(skip(self), fields(job = %self.job.name()))]
    async fn synchronize(&self) -> Result<MoverResult> {
        let key_secret = self.ensure_key_secret().await?;
        let address = self.ensure_service().await?;
        let service_account = self.job.ensure_service_account().await?;

        let status = MoverStatus {
            rsync: Some(RsyncStatus {
                address: address.clone(),
                port: Some(self.port()),
                key_secret: Some(key_secret.clone()),
            }),
            restic: None,
        };

        let progress = self
            .job
            .run(self.job_spec(service_account, &key_secret))
            .await?;

        match progress {
            JobProgress::Succeeded => {
                info!("Transfer received");
                Ok(MoverResult::completed().with_status(status))
            }
            JobProgress::Running => {
                if address.is_none() {
                    debug!("Waiting for service address");
                }
                Ok(MoverResult::in_progress(self.poll_interval).with_status(status))
            }
        }
    }

    async fn cleanup(&self) -> Result<()> {
        // The key secret and service outlive the cycle so the source keeps
        // a stable endpoint.
        self.job.remove().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use core_api::{Object, SecretSpec, ServiceType};

    async fn destination(
        client: &core_api::Client,
        rsync: Option<RsyncDestinationSpec>,
    ) -> ReplicationDestination {
        client
            .create(&Object::new(
                "default",
                "db",
                ReplicationDestinationSpec {
                    mover: MOVER_NAME.to_string(),
                    rsync,
                    ..Default::default()
                },
            ))
            .await
            .unwrap()
    }

    #[test]
    fn test_generated_psk_is_hex() {
        let psk = generate_psk();
        assert_eq!(psk.len(), PSK_BYTES * 2);
        assert!(psk.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(psk, generate_psk());
    }

    #[tokio::test]
    async fn test_publishes_endpoint_and_keeps_key_stable() {
        let (ctx, client) = testing::context("c1");
        let dest = destination(&client, None).await;
        let mover = RsyncDestinationMover::new(
            &ctx,
            &dest,
            DataVolume::writable("volrep-dst-db"),
            RsyncDestinationSpec::default(),
        );

        let first = mover.synchronize().await.unwrap();
        assert!(!first.complete);
        let rsync = first.status.rsync.clone().unwrap();
        assert_eq!(rsync.address, None);
        assert_eq!(rsync.port, Some(DEFAULT_PORT));
        assert_eq!(rsync.key_secret.as_deref(), Some("volrep-rsync-dst-db"));

        let key = client
            .get::<SecretSpec>("default", "volrep-rsync-dst-db")
            .await
            .unwrap()
            .unwrap();

        // Platform assigns an address
        let mut service = client
            .get::<ServiceSpec>("default", "volrep-rsync-dst-db")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.spec.service_type, ServiceType::ClusterIP);
        service.status.cluster_ip = Some("10.96.0.4".to_string());
        client.update_status(&service).await.unwrap();

        let second = mover.synchronize().await.unwrap();
        assert_eq!(
            second.status.rsync.unwrap().address.as_deref(),
            Some("10.96.0.4")
        );

        let key_again = client
            .get::<SecretSpec>("default", "volrep-rsync-dst-db")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key.spec.data, key_again.spec.data);
        assert!(key.spec.data[PSK_KEY].starts_with("volrep:"));
    }

    #[tokio::test]
    async fn test_user_key_secret_and_cleanup_keeps_endpoint() {
        let (ctx, client) = testing::context("c2");
        let spec = RsyncDestinationSpec {
            service_type: Some(ServiceType::LoadBalancer),
            port: Some(2222),
            key_secret: Some("my-key".to_string()),
        };
        let dest = destination(&client, Some(spec.clone())).await;
        let mover = RsyncDestinationMover::new(&ctx, &dest, DataVolume::writable("target"), spec);

        let result = mover.synchronize().await.unwrap();
        assert_eq!(
            result.status.rsync.unwrap().key_secret.as_deref(),
            Some("my-key")
        );
        assert!(client
            .get::<SecretSpec>("default", "volrep-rsync-dst-db")
            .await
            .unwrap()
            .is_none());

        let job = client
            .get::<JobSpec>("default", "volrep-rsync-dst-db-c2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.spec.env["LISTEN_PORT"], "2222");

        mover.cleanup().await.unwrap();
        assert!(client
            .get::<JobSpec>("default", "volrep-rsync-dst-db-c2")
            .await
            .unwrap()
            .is_none());
        assert!(client
            .get::<ServiceSpec>("default", "volrep-rsync-dst-db")
            .await
            .unwrap()
            .is_some());
    }
}
