//! Uploaded stemcell records.

use crate::error::DeployError;
use crate::state::StemcellRecord;
use crate::store::service::{new_id, update, StateService};
use async_trait::async_trait;
use std::sync::Arc;

/// Stemcell records plus the pointer to the current one.
///
/// Records are unique on (name, version) and on cid.
#[async_trait]
pub trait StemcellRepo: Send + Sync {
    async fn update_current(&self, id: &str) -> Result<(), DeployError>;
    async fn find_current(&self) -> Result<Option<StemcellRecord>, DeployError>;
    async fn clear_current(&self) -> Result<(), DeployError>;
    async fn save(&self, name: &str, version: &str, cid: &str)
        -> Result<StemcellRecord, DeployError>;
    async fn find(&self, name: &str, version: &str) -> Result<Option<StemcellRecord>, DeployError>;
    async fn all(&self) -> Result<Vec<StemcellRecord>, DeployError>;
    /// Remove a record, clearing the current pointer if it pointed at it.
    async fn delete(&self, record: &StemcellRecord) -> Result<(), DeployError>;
}

pub struct StemcellRepository {
    service: Arc<dyn StateService>,
}

impl StemcellRepository {
    pub fn new(service: Arc<dyn StateService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl StemcellRepo for StemcellRepository {
    async fn update_current(&self, id: &str) -> Result<(), DeployError> {
        update(self.service.as_ref(), |file| {
            if !file.stemcells.iter().any(|s| s.id == id) {
                return Err(DeployError::InvalidState(format!(
                    "Verifying stemcell record exists with id '{}'",
                    id
                )));
            }
            file.current_stemcell_id = id.to_string();
            Ok(())
        })
        .await
    }

    async fn find_current(&self) -> Result<Option<StemcellRecord>, DeployError> {
        let file = self
            .service
            .load()
            .await
            .map_err(|e| e.context("Loading existing config"))?;
        Ok(file.current_stemcell().cloned())
    }

    async fn clear_current(&self) -> Result<(), DeployError> {
        update(self.service.as_ref(), |file| {
            file.current_stemcell_id.clear();
            Ok(())
        })
        .await
    }

    async fn save(
        &self,
        name: &str,
        version: &str,
        cid: &str,
    ) -> Result<StemcellRecord, DeployError> {
        update(self.service.as_ref(), |file| {
            for existing in &file.stemcells {
                if existing.name == name && existing.version == version {
                    return Err(DeployError::InvalidState(format!(
                        "Failed to save stemcell record '{}/{}' (duplicate name/version), existing record found '{}'",
                        name, version, existing.id
                    )));
                }
                if existing.cid == cid {
                    return Err(DeployError::InvalidState(format!(
                        "Failed to save stemcell record '{}/{}' (duplicate cid '{}'), existing record found '{}'",
                        name, version, cid, existing.id
                    )));
                }
            }

            let record = StemcellRecord {
                id: new_id(),
                name: name.to_string(),
                version: version.to_string(),
                cid: cid.to_string(),
            };
            file.stemcells.push(record.clone());
            Ok(record)
        })
        .await
    }

    async fn find(&self, name: &str, version: &str) -> Result<Option<StemcellRecord>, DeployError> {
        let file = self
            .service
            .load()
            .await
            .map_err(|e| e.context("Loading existing config"))?;
        Ok(file
            .stemcells
            .into_iter()
            .find(|s| s.name == name && s.version == version))
    }

    async fn all(&self) -> Result<Vec<StemcellRecord>, DeployError> {
        let file = self
            .service
            .load()
            .await
            .map_err(|e| e.context("Loading existing config"))?;
        Ok(file.stemcells)
    }

    async fn delete(&self, record: &StemcellRecord) -> Result<(), DeployError> {
        update(self.service.as_ref(), |file| {
            file.stemcells.retain(|s| s.id != record.id);
            if file.current_stemcell_id == record.id {
                file.current_stemcell_id.clear();
            }
            Ok(())
        })
        .await
    }
}
