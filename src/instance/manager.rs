//! Finds, creates and deletes the deployment's instance.

use crate::config::DeployerConfig;
use crate::disk::Disk;
use crate::error::{DeployError, ResultExt};
use crate::instance::{Instance, InstanceState, StateBuilder};
use crate::sshtunnel::SshTunnelFactory;
use crate::stage::Stage;
use crate::stemcell::CloudStemcell;
use crate::types::{Manifest, RegistryConfig, SshTunnelConfig};
use crate::vm::{Vm, VmManager};
use std::sync::Arc;
use std::time::Duration;

pub struct InstanceManager {
    vm_manager: Arc<VmManager>,
    tunnels: SshTunnelFactory,
    state_builder: Arc<dyn StateBuilder>,
    config: DeployerConfig,
}

impl InstanceManager {
    pub fn new(
        vm_manager: Arc<VmManager>,
        tunnels: SshTunnelFactory,
        state_builder: Arc<dyn StateBuilder>,
        config: DeployerConfig,
    ) -> Self {
        Self {
            vm_manager,
            tunnels,
            state_builder,
            config,
        }
    }

    fn instance(&self, job_name: &str, id: u32, vm: Vm, state: InstanceState) -> Instance {
        Instance::new(
            job_name,
            id,
            vm,
            self.tunnels.clone(),
            self.state_builder.clone(),
            self.config.clone(),
            state,
        )
    }

    /// The instance left by a previous run, if any. At most one exists.
    ///
    /// The job name is not persisted, so a found instance is `unknown/0`.
    pub async fn find_current(&self) -> Result<Vec<Instance>, DeployError> {
        let vm = self
            .vm_manager
            .find_current()
            .await
            .context("Finding currently deployed instances")?;

        Ok(vm
            .into_iter()
            .map(|vm| self.instance("unknown", 0, vm, InstanceState::Running))
            .collect())
    }

    /// Create the VM, promote the stemcell, wait for the agent and converge
    /// the disk. Jobs are applied separately with [`Instance::update_jobs`].
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        job_name: &str,
        id: u32,
        manifest: &Manifest,
        stemcell: &CloudStemcell,
        registry: &RegistryConfig,
        ssh_tunnel: &SshTunnelConfig,
        stage: &Stage,
    ) -> Result<(Instance, Vec<Disk>), DeployError> {
        let step = format!(
            "Creating VM for instance '{}/{}' from stemcell '{}'",
            job_name,
            id,
            stemcell.cid()
        );
        let vm = stage
            .run(&step, async {
                let vm = self
                    .vm_manager
                    .create(stemcell, manifest)
                    .await
                    .context("Creating VM")?;
                stemcell
                    .promote_as_current()
                    .await
                    .with_context(|| format!("Promoting stemcell as current '{}'", stemcell.cid()))?;
                Ok(vm)
            })
            .await?;

        let mut instance = self.instance(job_name, id, vm, InstanceState::Creating);

        instance
            .wait_until_ready(registry, ssh_tunnel, stage)
            .await
            .context("Waiting until instance is ready")?;

        let disks = instance
            .update_disks(manifest, stage)
            .await
            .context("Updating instance disks")?;

        Ok((instance, disks))
    }

    /// Delete every current instance.
    pub async fn delete_all(
        &self,
        ping_timeout: Duration,
        ping_delay: Duration,
        skip_drain: bool,
        stage: &Stage,
    ) -> Result<(), DeployError> {
        for mut instance in self.find_current().await? {
            instance
                .delete(ping_timeout, ping_delay, skip_drain, stage)
                .await
                .with_context(|| {
                    format!(
                        "Deleting existing instance '{}/{}'",
                        instance.job_name(),
                        instance.id()
                    )
                })?;
        }
        Ok(())
    }
}
