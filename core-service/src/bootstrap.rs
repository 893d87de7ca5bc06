//! Startup helpers: mover registration and the host entry point.

use std::sync::Arc;

use anyhow::Context;
use core_mover::{MoverError, Registry, RegistryBuilder};
use core_runtime::ControllerConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{CoreError, Result};
use crate::CoreService;

/// Register every backend compiled into this build.
pub fn register_movers(registry: &mut RegistryBuilder) -> Result<()> {
    #[cfg(feature = "rsync")]
    mover_rsync::register(registry)?;
    #[cfg(feature = "rclone")]
    mover_rclone::register(registry)?;
    #[cfg(feature = "restic")]
    mover_restic::register(registry)?;
    #[cfg(not(any(feature = "rsync", feature = "rclone", feature = "restic")))]
    let _ = registry;
    Ok(())
}

/// Publish the compiled-in backends as the process-wide registry.
///
/// Safe to call more than once; later calls return the registry installed
/// by the first.
pub fn install_movers() -> Result<Arc<Registry>> {
    if let Ok(registry) = Registry::global() {
        return Ok(registry);
    }
    let mut builder = RegistryBuilder::new();
    register_movers(&mut builder)?;
    if builder.is_empty() {
        return Err(CoreError::CapabilityMissing {
            capability: "mover".to_string(),
            message: "no mover backend enabled; build with rsync, rclone or restic".to_string(),
        });
    }
    match builder.install() {
        Ok(registry) => Ok(registry),
        // Lost a race with another caller.
        Err(MoverError::AlreadyInitialized) => Ok(Registry::global()?),
        Err(e) => Err(e.into()),
    }
}

/// Build a service on the process-wide registry.
pub fn bootstrap(config: ControllerConfig) -> Result<CoreService> {
    let registry = install_movers()?;
    info!(movers = ?registry.names(), "Movers installed");
    CoreService::new(config, registry)
}

/// Bootstrap and run the controller until `shutdown` is cancelled.
pub async fn run(config: ControllerConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let service = bootstrap(config).context("failed to bootstrap replication controller")?;
    service
        .controller(shutdown)
        .run()
        .await
        .context("replication controller exited with an error")
}
