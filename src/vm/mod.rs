//! One VM: cloud calls plus the agent running on it.

mod disk_deployer;
mod manager;

pub use disk_deployer::DiskDeployer;
pub use manager::VmManager;

use crate::agent::{AgentClient, AgentState, ApplySpec, ScriptOptions};
use crate::cloud::Cloud;
use crate::disk::Disk;
use crate::error::{CloudErrorKind, DeployError, ResultExt};
use crate::stage::Stage;
use crate::store::{StemcellRepo, VmRepo};
use crate::types::DiskPool;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Vm {
    cid: String,
    vm_repo: Arc<dyn VmRepo>,
    stemcell_repo: Arc<dyn StemcellRepo>,
    disk_deployer: Arc<DiskDeployer>,
    agent: Arc<dyn AgentClient>,
    cloud: Arc<dyn Cloud>,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm").field("cid", &self.cid).finish()
    }
}

impl Vm {
    pub fn new(
        cid: impl Into<String>,
        vm_repo: Arc<dyn VmRepo>,
        stemcell_repo: Arc<dyn StemcellRepo>,
        disk_deployer: Arc<DiskDeployer>,
        agent: Arc<dyn AgentClient>,
        cloud: Arc<dyn Cloud>,
    ) -> Self {
        Self {
            cid: cid.into(),
            vm_repo,
            stemcell_repo,
            disk_deployer,
            agent,
            cloud,
        }
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub async fn exists(&self) -> Result<bool, DeployError> {
        self.cloud
            .has_vm(&self.cid)
            .await
            .with_context(|| format!("Checking existance of VM '{}'", self.cid))
    }

    pub async fn wait_until_ready(&self, timeout: Duration, delay: Duration) -> Result<(), DeployError> {
        self.agent.wait_until_ready(timeout, delay).await
    }

    pub async fn start(&self) -> Result<(), DeployError> {
        tracing::debug!(vm_cid = %self.cid, "starting agent");
        self.agent.start().await.context("Starting agent")
    }

    pub async fn stop(&self) -> Result<(), DeployError> {
        tracing::debug!(vm_cid = %self.cid, "stopping agent");
        self.agent.stop().await.context("Stopping agent")
    }

    pub async fn apply(&self, spec: &ApplySpec) -> Result<(), DeployError> {
        tracing::debug!(vm_cid = %self.cid, "sending apply message to the agent");
        self.agent
            .apply(spec)
            .await
            .context("Sending apply spec to agent")
    }

    pub async fn drain(&self) -> Result<(), DeployError> {
        tracing::debug!(vm_cid = %self.cid, "draining jobs");
        self.agent.drain().await.context("Draining jobs")
    }

    pub async fn run_script(&self, script: &str, options: &ScriptOptions) -> Result<(), DeployError> {
        tracing::debug!(vm_cid = %self.cid, script, "running lifecycle script");
        self.agent
            .run_script(script, options)
            .await
            .with_context(|| format!("Sending run_script '{}' to agent", script))
    }

    pub async fn get_state(&self) -> Result<AgentState, DeployError> {
        self.agent.get_state().await.context("Getting agent state")
    }

    /// Converge the persistent disk onto this VM.
    pub async fn update_disks(&self, disk_pool: &DiskPool, stage: &Stage) -> Result<Vec<Disk>, DeployError> {
        self.disk_deployer
            .deploy(disk_pool, self, stage)
            .await
            .context("Deploying disk")
    }

    pub async fn wait_to_be_running(&self, max_attempts: u32, delay: Duration) -> Result<(), DeployError> {
        self.agent.wait_to_be_running(max_attempts, delay).await
    }

    /// Attach in the cloud, then have the agent mount it.
    pub async fn attach_disk(&self, disk: &Disk) -> Result<(), DeployError> {
        self.cloud
            .attach_disk(&self.cid, disk.cid())
            .await
            .context("Attaching disk in the cloud")?;
        self.agent
            .mount_disk(disk.cid())
            .await
            .context("Mounting disk")
    }

    pub async fn detach_disk(&self, disk: &Disk) -> Result<(), DeployError> {
        self.cloud
            .detach_disk(&self.cid, disk.cid())
            .await
            .context("Detaching disk in the cloud")
    }

    /// Cloud ids of the disks the agent reports.
    pub async fn disks(&self) -> Result<Vec<String>, DeployError> {
        self.agent.list_disk().await.context("Listing vm disks")
    }

    pub async fn unmount_disk(&self, disk_cid: &str) -> Result<(), DeployError> {
        self.agent.unmount_disk(disk_cid).await
    }

    pub async fn migrate_disk(&self) -> Result<(), DeployError> {
        self.agent.migrate_disk().await
    }

    /// Delete in the cloud and forget the VM.
    ///
    /// `VmNotFound` still clears the VM record and the current stemcell; the
    /// error is returned so callers can report a skip.
    pub async fn delete(&self) -> Result<(), DeployError> {
        let deleted = self.cloud.delete_vm(&self.cid).await;
        if let Err(err) = &deleted {
            if err.kind != CloudErrorKind::VmNotFound {
                return deleted.context("Deleting vm in the cloud");
            }
        }

        self.vm_repo
            .clear_current()
            .await
            .context("Deleting vm from vm repo")?;
        self.stemcell_repo
            .clear_current()
            .await
            .context("Clearing current stemcell from stemcell repo")?;

        deleted.map_err(DeployError::from)
    }
}
