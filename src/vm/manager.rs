//! Finds and creates the deployment's VM.

use crate::agent::AgentClient;
use crate::cloud::Cloud;
use crate::error::{CloudErrorKind, DeployError, ResultExt};
use crate::stemcell::CloudStemcell;
use crate::store::Repositories;
use crate::types::Manifest;
use crate::vm::{DiskDeployer, Vm};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct VmManager {
    repos: Repositories,
    disk_deployer: Arc<DiskDeployer>,
    agent: Arc<dyn AgentClient>,
    cloud: Arc<dyn Cloud>,
}

impl VmManager {
    pub fn new(
        repos: Repositories,
        disk_deployer: Arc<DiskDeployer>,
        agent: Arc<dyn AgentClient>,
        cloud: Arc<dyn Cloud>,
    ) -> Self {
        Self {
            repos,
            disk_deployer,
            agent,
            cloud,
        }
    }

    fn wrap(&self, cid: String) -> Vm {
        Vm::new(
            cid,
            self.repos.vms.clone(),
            self.repos.stemcells.clone(),
            self.disk_deployer.clone(),
            self.agent.clone(),
            self.cloud.clone(),
        )
    }

    pub async fn find_current(&self) -> Result<Option<Vm>, DeployError> {
        let cid = self
            .repos
            .vms
            .find_current()
            .await
            .context("Finding currently deployed vm")?;
        Ok(cid.map(|cid| self.wrap(cid)))
    }

    /// Create the VM for the manifest's job from `stemcell`.
    ///
    /// The VM is recorded as current as soon as the cloud returns its id.
    pub async fn create(&self, stemcell: &CloudStemcell, manifest: &Manifest) -> Result<Vm, DeployError> {
        let job_name = manifest.job_name();
        let networks = manifest
            .network_interfaces(job_name)
            .context("Getting network spec")?;
        let resource_pool = manifest
            .resource_pool(job_name)
            .with_context(|| format!("Getting resource pool for job '{}'", job_name))?;
        let disk_cids: Vec<String> = self
            .repos
            .disks
            .find_current()
            .await
            .context("Finding current disk")?
            .into_iter()
            .map(|d| d.cid)
            .collect();

        let agent_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(agent_id = %agent_id, stemcell_cid = %stemcell.cid(), "creating vm");

        let cid = self
            .cloud
            .create_vm(
                &agent_id,
                stemcell.cid(),
                &resource_pool.cloud_properties,
                &disk_cids,
                &networks,
                &resource_pool.env,
            )
            .await
            .with_context(|| format!("Creating vm with stemcell cid '{}'", stemcell.cid()))?;

        // record it before anything else can fail so it is never leaked
        self.repos
            .vms
            .update_current(&cid)
            .await
            .context("Updating current vm record")?;

        let metadata = BTreeMap::from([
            ("deployment".to_string(), manifest.name.clone()),
            ("job".to_string(), job_name.to_string()),
            ("index".to_string(), "0".to_string()),
            ("name".to_string(), format!("{}/0", job_name)),
            ("director".to_string(), env!("CARGO_PKG_NAME").to_string()),
        ]);
        match self.cloud.set_vm_metadata(&cid, &metadata).await {
            Ok(()) => {}
            Err(err) if err.kind == CloudErrorKind::NotImplemented => {
                tracing::debug!(vm_cid = %cid, "cloud does not support vm metadata");
            }
            Err(err) => {
                return Err(DeployError::from(err).context(format!("Setting VM metadata on '{}'", cid)));
            }
        }

        Ok(self.wrap(cid))
    }
}
