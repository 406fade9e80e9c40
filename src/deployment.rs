//! What is deployed right now, and how to get rid of it.

use crate::config::DeployerConfig;
use crate::disk::{Disk, DiskManager};
use crate::error::{CloudErrorKind, DeployError, ResultExt};
use crate::instance::{Instance, InstanceManager};
use crate::release::ReleaseManager;
use crate::stage::Stage;
use crate::stemcell::{skip_not_found, CloudStemcell, StemcellManager};

/// The current instance, disk and stemcell of a workspace.
pub struct Deployment {
    instances: Vec<Instance>,
    disks: Vec<Disk>,
    stemcells: Vec<CloudStemcell>,
    config: DeployerConfig,
}

impl Deployment {
    pub fn new(
        instances: Vec<Instance>,
        disks: Vec<Disk>,
        stemcells: Vec<CloudStemcell>,
        config: DeployerConfig,
    ) -> Self {
        Self {
            instances,
            disks,
            stemcells,
            config,
        }
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn disks(&self) -> &[Disk] {
        &self.disks
    }

    pub fn stemcells(&self) -> &[CloudStemcell] {
        &self.stemcells
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty() && self.disks.is_empty() && self.stemcells.is_empty()
    }

    /// Delete instances, then disks, then stemcells.
    ///
    /// Everything deleted is dropped from this value, so calling it again
    /// does nothing. Resources already gone from the cloud are skipped.
    /// Instances are drained first unless the config says `skip_drain`.
    pub async fn delete(&mut self, stage: &Stage) -> Result<(), DeployError> {
        while let Some(mut instance) = self.instances.pop() {
            instance
                .delete(
                    self.config.ping_timeout,
                    self.config.ping_delay,
                    self.config.skip_drain,
                    stage,
                )
                .await
                .with_context(|| {
                    format!("Deleting instance '{}/{}'", instance.job_name(), instance.id())
                })?;
        }

        while let Some(disk) = self.disks.pop() {
            let step = format!("Deleting disk '{}'", disk.cid());
            stage
                .perform(&step, async { skip_not_found(disk.delete().await, CloudErrorKind::DiskNotFound) })
                .await?;
        }

        while let Some(stemcell) = self.stemcells.pop() {
            let step = format!("Deleting stemcell '{}'", stemcell.cid());
            stage
                .perform(&step, async {
                    skip_not_found(stemcell.delete().await, CloudErrorKind::StemcellNotFound)
                })
                .await?;
        }

        Ok(())
    }
}

pub struct DeploymentManager {
    instances: InstanceManager,
    disks: DiskManager,
    stemcells: StemcellManager,
    releases: ReleaseManager,
    config: DeployerConfig,
}

impl DeploymentManager {
    pub fn new(
        instances: InstanceManager,
        disks: DiskManager,
        stemcells: StemcellManager,
        releases: ReleaseManager,
        config: DeployerConfig,
    ) -> Self {
        Self {
            instances,
            disks,
            stemcells,
            releases,
            config,
        }
    }

    /// The current deployment, or `None` when nothing is deployed.
    pub async fn find_current(&self) -> Result<Option<Deployment>, DeployError> {
        let instances = self
            .instances
            .find_current()
            .await
            .context("Finding current deployment instances")?;
        let disks: Vec<Disk> = self
            .disks
            .find_current()
            .await
            .context("Finding current deployment disks")?
            .into_iter()
            .collect();
        let stemcells: Vec<CloudStemcell> = self
            .stemcells
            .find_current()
            .await
            .context("Finding current deployment stemcells")?
            .into_iter()
            .collect();

        let deployment = Deployment::new(instances, disks, stemcells, self.config.clone());
        if deployment.is_empty() {
            return Ok(None);
        }
        Ok(Some(deployment))
    }

    /// Delete orphaned disks, stemcells and release records.
    pub async fn cleanup(&self, stage: &Stage) -> Result<(), DeployError> {
        self.disks
            .delete_unused(stage)
            .await
            .context("Deleting unused disks")?;
        self.stemcells
            .delete_unused(stage)
            .await
            .context("Deleting unused stemcells")?;
        self.releases
            .delete_unused(stage)
            .await
            .context("Deleting unused releases")
    }
}
