//! Persistent disks: one cloud disk plus its record.

use crate::cloud::Cloud;
use crate::error::{CloudErrorKind, DeployError, ResultExt};
use crate::stage::Stage;
use crate::state::DiskRecord;
use crate::stemcell::skip_not_found;
use crate::store::DiskRepo;
use crate::types::{CloudProperties, DiskPool};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Disk {
    record: DiskRecord,
    cloud: Arc<dyn Cloud>,
    repo: Arc<dyn DiskRepo>,
}

impl fmt::Debug for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disk").field("record", &self.record).finish()
    }
}

impl Disk {
    pub fn new(record: DiskRecord, cloud: Arc<dyn Cloud>, repo: Arc<dyn DiskRepo>) -> Self {
        Self { record, cloud, repo }
    }

    pub fn cid(&self) -> &str {
        &self.record.cid
    }

    pub fn size(&self) -> u64 {
        self.record.size
    }

    pub fn cloud_properties(&self) -> &CloudProperties {
        &self.record.cloud_properties
    }

    pub fn record(&self) -> &DiskRecord {
        &self.record
    }

    /// Whether a disk of `size` with `cloud_properties` would differ from
    /// this one. Absent properties always count as a difference.
    pub fn needs_migration(&self, size: u64, cloud_properties: Option<&CloudProperties>) -> bool {
        match cloud_properties {
            None => true,
            Some(props) => self.record.size != size || self.record.cloud_properties != *props,
        }
    }

    /// Delete from the cloud, then from the repo.
    ///
    /// A `DiskNotFound` from the cloud still removes the record (and clears
    /// the current pointer); the error is returned so callers can report a
    /// skip.
    pub async fn delete(&self) -> Result<(), DeployError> {
        let deleted = self.cloud.delete_disk(&self.record.cid).await;
        if let Err(err) = &deleted {
            if err.kind != CloudErrorKind::DiskNotFound {
                return deleted.with_context(|| format!("Deleting disk '{}' in the cloud", self.record.cid));
            }
        }

        let record = self
            .repo
            .find(&self.record.cid)
            .await
            .context("Finding disk record")?;
        if let Some(record) = record {
            self.repo
                .delete(&record)
                .await
                .context("Deleting disk record")?;
        }

        deleted.map_err(DeployError::from)
    }
}

pub struct DiskManager {
    cloud: Arc<dyn Cloud>,
    repo: Arc<dyn DiskRepo>,
}

impl DiskManager {
    pub fn new(cloud: Arc<dyn Cloud>, repo: Arc<dyn DiskRepo>) -> Self {
        Self { cloud, repo }
    }

    fn wrap(&self, record: DiskRecord) -> Disk {
        Disk::new(record, self.cloud.clone(), self.repo.clone())
    }

    /// Create a disk for `vm_cid` and record it. The record is not current.
    pub async fn create(&self, disk_pool: &DiskPool, vm_cid: &str) -> Result<Disk, DeployError> {
        let cloud_properties = disk_pool.cloud_properties_or_empty();

        tracing::debug!(size = disk_pool.disk_size, vm_cid, "creating disk");
        let cid = self
            .cloud
            .create_disk(disk_pool.disk_size, &cloud_properties, vm_cid)
            .await
            .with_context(|| format!("Creating {}MB disk with vm cid '{}'", disk_pool.disk_size, vm_cid))?;

        let record = self
            .repo
            .save(&cid, disk_pool.disk_size, &cloud_properties)
            .await
            .context("Saving disk record")?;

        Ok(self.wrap(record))
    }

    pub async fn find_current(&self) -> Result<Option<Disk>, DeployError> {
        let record = self
            .repo
            .find_current()
            .await
            .context("Reading disk record")?;
        Ok(record.map(|r| self.wrap(r)))
    }

    /// Every recorded disk except the current one.
    pub async fn find_unused(&self) -> Result<Vec<Disk>, DeployError> {
        let records = self.repo.all().await.context("Getting all disk records")?;
        let current = self
            .repo
            .find_current()
            .await
            .context("Finding current disk record")?;

        Ok(records
            .into_iter()
            .filter(|r| current.as_ref().map_or(true, |c| c.id != r.id))
            .map(|r| self.wrap(r))
            .collect())
    }

    pub async fn delete_unused(&self, stage: &Stage) -> Result<(), DeployError> {
        let disks = self.find_unused().await.context("Finding unused disks")?;

        for disk in disks {
            let step = format!("Deleting unused disk '{}'", disk.cid());
            stage
                .perform(&step, async { skip_not_found(disk.delete().await, CloudErrorKind::DiskNotFound) })
                .await?;
        }
        Ok(())
    }
}
