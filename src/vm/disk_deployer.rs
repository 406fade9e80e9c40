//! Persistent disk convergence.
//!
//! Ordering matters: a new disk is attached and holds the data before it
//! becomes current, and the old disk is only detached and deleted after
//! the switch. A crash at any point leaves the current pointer on a disk
//! that holds the data.

use crate::disk::{Disk, DiskManager};
use crate::error::{CloudErrorKind, DeployError, ResultExt};
use crate::stage::Stage;
use crate::stemcell::skip_not_found;
use crate::store::DiskRepo;
use crate::types::DiskPool;
use crate::vm::Vm;
use std::sync::Arc;

pub struct DiskDeployer {
    manager: DiskManager,
    repo: Arc<dyn DiskRepo>,
}

impl DiskDeployer {
    pub fn new(manager: DiskManager, repo: Arc<dyn DiskRepo>) -> Self {
        Self { manager, repo }
    }

    /// Make `vm` carry exactly one disk matching `disk_pool`, then delete
    /// every other recorded disk.
    pub async fn deploy(&self, disk_pool: &DiskPool, vm: &Vm, stage: &Stage) -> Result<Vec<Disk>, DeployError> {
        if disk_pool.disk_size == 0 {
            return Ok(Vec::new());
        }

        let current = self
            .manager
            .find_current()
            .await
            .context("Finding existing disk")?;

        let disk = match current {
            Some(disk) => self.deploy_existing_disk(disk, disk_pool, vm, stage).await?,
            None => self.deploy_new_disk(disk_pool, vm, stage).await?,
        };

        self.manager.delete_unused(stage).await?;

        Ok(vec![disk])
    }

    async fn deploy_existing_disk(
        &self,
        disk: Disk,
        disk_pool: &DiskPool,
        vm: &Vm,
        stage: &Stage,
    ) -> Result<Disk, DeployError> {
        // the current disk should already be attached; attaching is idempotent
        self.attach_disk(&disk, vm, stage).await?;

        if disk.needs_migration(disk_pool.disk_size, disk_pool.cloud_properties.as_ref()) {
            return self.migrate_disk(disk, disk_pool, vm, stage).await;
        }
        Ok(disk)
    }

    async fn deploy_new_disk(&self, disk_pool: &DiskPool, vm: &Vm, stage: &Stage) -> Result<Disk, DeployError> {
        let disk = self.create_disk(disk_pool, vm, stage).await?;
        self.attach_disk(&disk, vm, stage).await?;
        self.update_current_disk_record(&disk).await?;
        Ok(disk)
    }

    async fn migrate_disk(
        &self,
        original: Disk,
        disk_pool: &DiskPool,
        vm: &Vm,
        stage: &Stage,
    ) -> Result<Disk, DeployError> {
        tracing::debug!(disk_cid = %original.cid(), "migrating disk");

        let new_disk = self.create_disk(disk_pool, vm, stage).await?;
        self.attach_disk(&new_disk, vm, stage).await?;

        let step = format!(
            "Migrating disk content from '{}' to '{}'",
            original.cid(),
            new_disk.cid()
        );
        stage.run(&step, vm.migrate_disk()).await?;

        self.update_current_disk_record(&new_disk).await?;

        let step = format!("Detaching disk '{}'", original.cid());
        stage.run(&step, vm.detach_disk(&original)).await?;

        let step = format!("Deleting disk '{}'", original.cid());
        stage
            .perform(&step, async {
                skip_not_found(original.delete().await, CloudErrorKind::DiskNotFound)
            })
            .await?;

        Ok(new_disk)
    }

    async fn create_disk(&self, disk_pool: &DiskPool, vm: &Vm, stage: &Stage) -> Result<Disk, DeployError> {
        stage
            .run("Creating disk", self.manager.create(disk_pool, vm.cid()))
            .await
    }

    async fn attach_disk(&self, disk: &Disk, vm: &Vm, stage: &Stage) -> Result<(), DeployError> {
        let step = format!("Attaching disk '{}' to VM '{}'", disk.cid(), vm.cid());
        stage.run(&step, vm.attach_disk(disk)).await
    }

    async fn update_current_disk_record(&self, disk: &Disk) -> Result<(), DeployError> {
        let record = self
            .repo
            .find(disk.cid())
            .await
            .context("Finding disk record")?
            .ok_or_else(|| DeployError::InvalidState("Failed to find disk record for new disk".into()))?;

        self.repo
            .update_current(&record.id)
            .await
            .context("Updating current disk record")
    }
}
