//! Persistent disk records.

use crate::error::DeployError;
use crate::state::DiskRecord;
use crate::store::service::{new_id, update, StateService};
use crate::types::CloudProperties;
use async_trait::async_trait;
use std::sync::Arc;

/// Disk records plus the pointer to the current one.
///
/// Saving never collides: every saved disk gets a fresh id.
#[async_trait]
pub trait DiskRepo: Send + Sync {
    async fn update_current(&self, id: &str) -> Result<(), DeployError>;
    async fn find_current(&self) -> Result<Option<DiskRecord>, DeployError>;
    async fn clear_current(&self) -> Result<(), DeployError>;
    async fn save(
        &self,
        cid: &str,
        size: u64,
        cloud_properties: &CloudProperties,
    ) -> Result<DiskRecord, DeployError>;
    async fn find(&self, cid: &str) -> Result<Option<DiskRecord>, DeployError>;
    async fn all(&self) -> Result<Vec<DiskRecord>, DeployError>;
    /// Remove a record, clearing the current pointer if it pointed at it.
    async fn delete(&self, record: &DiskRecord) -> Result<(), DeployError>;
}

pub struct DiskRepository {
    service: Arc<dyn StateService>,
}

impl DiskRepository {
    pub fn new(service: Arc<dyn StateService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DiskRepo for DiskRepository {
    async fn update_current(&self, id: &str) -> Result<(), DeployError> {
        update(self.service.as_ref(), |file| {
            if !file.disks.iter().any(|d| d.id == id) {
                return Err(DeployError::InvalidState(format!(
                    "Verifying disk record exists with id '{}'",
                    id
                )));
            }
            file.current_disk_id = id.to_string();
            Ok(())
        })
        .await
    }

    async fn find_current(&self) -> Result<Option<DiskRecord>, DeployError> {
        let file = self
            .service
            .load()
            .await
            .map_err(|e| e.context("Loading existing config"))?;
        Ok(file.current_disk().cloned())
    }

    async fn clear_current(&self) -> Result<(), DeployError> {
        update(self.service.as_ref(), |file| {
            file.current_disk_id.clear();
            Ok(())
        })
        .await
    }

    async fn save(
        &self,
        cid: &str,
        size: u64,
        cloud_properties: &CloudProperties,
    ) -> Result<DiskRecord, DeployError> {
        update(self.service.as_ref(), |file| {
            let record = DiskRecord {
                id: new_id(),
                cid: cid.to_string(),
                size,
                cloud_properties: cloud_properties.clone(),
            };
            file.disks.push(record.clone());
            Ok(record)
        })
        .await
    }

    async fn find(&self, cid: &str) -> Result<Option<DiskRecord>, DeployError> {
        let file = self
            .service
            .load()
            .await
            .map_err(|e| e.context("Loading existing config"))?;
        Ok(file.disks.into_iter().find(|d| d.cid == cid))
    }

    async fn all(&self) -> Result<Vec<DiskRecord>, DeployError> {
        let file = self
            .service
            .load()
            .await
            .map_err(|e| e.context("Loading existing config"))?;
        Ok(file.disks)
    }

    async fn delete(&self, record: &DiskRecord) -> Result<(), DeployError> {
        update(self.service.as_ref(), |file| {
            file.disks.retain(|d| d.id != record.id);
            if file.current_disk_id == record.id {
                file.current_disk_id.clear();
            }
            Ok(())
        })
        .await
    }
}
