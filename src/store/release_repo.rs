//! Release records.

use crate::error::DeployError;
use crate::state::ReleaseRecord;
use crate::store::service::{new_id, update, StateService};
use async_trait::async_trait;
use std::sync::Arc;

/// Release records plus the set of releases currently deployed.
///
/// Unlike disks and stemcells, several releases can be current at once.
#[async_trait]
pub trait ReleaseRepo: Send + Sync {
    /// Replace the current set. Every id must reference an existing record.
    async fn update_current(&self, ids: &[String]) -> Result<(), DeployError>;
    async fn find_current(&self) -> Result<Vec<ReleaseRecord>, DeployError>;
    async fn clear_current(&self) -> Result<(), DeployError>;
    async fn save(&self, name: &str, version: &str) -> Result<ReleaseRecord, DeployError>;
    async fn find(&self, name: &str, version: &str) -> Result<Option<ReleaseRecord>, DeployError>;
    async fn all(&self) -> Result<Vec<ReleaseRecord>, DeployError>;
    /// Remove a record and drop it from the current set.
    async fn delete(&self, record: &ReleaseRecord) -> Result<(), DeployError>;
}

pub struct ReleaseRepository {
    service: Arc<dyn StateService>,
}

impl ReleaseRepository {
    pub fn new(service: Arc<dyn StateService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ReleaseRepo for ReleaseRepository {
    async fn update_current(&self, ids: &[String]) -> Result<(), DeployError> {
        update(self.service.as_ref(), |file| {
            for id in ids {
                if !file.releases.iter().any(|r| &r.id == id) {
                    return Err(DeployError::InvalidState(format!(
                        "Verifying release record exists with id '{}'",
                        id
                    )));
                }
            }
            file.current_release_ids = ids.to_vec();
            Ok(())
        })
        .await
    }

    async fn find_current(&self) -> Result<Vec<ReleaseRecord>, DeployError> {
        let file = self
            .service
            .load()
            .await
            .map_err(|e| e.context("Loading existing config"))?;
        let current = file
            .releases
            .into_iter()
            .filter(|r| file.current_release_ids.contains(&r.id))
            .collect();
        Ok(current)
    }

    async fn clear_current(&self) -> Result<(), DeployError> {
        update(self.service.as_ref(), |file| {
            file.current_release_ids.clear();
            Ok(())
        })
        .await
    }

    async fn save(&self, name: &str, version: &str) -> Result<ReleaseRecord, DeployError> {
        update(self.service.as_ref(), |file| {
            let record = ReleaseRecord {
                id: new_id(),
                name: name.to_string(),
                version: version.to_string(),
            };
            file.releases.push(record.clone());
            Ok(record)
        })
        .await
    }

    async fn find(&self, name: &str, version: &str) -> Result<Option<ReleaseRecord>, DeployError> {
        let file = self
            .service
            .load()
            .await
            .map_err(|e| e.context("Loading existing config"))?;
        Ok(file
            .releases
            .into_iter()
            .find(|r| r.name == name && r.version == version))
    }

    async fn all(&self) -> Result<Vec<ReleaseRecord>, DeployError> {
        let file = self
            .service
            .load()
            .await
            .map_err(|e| e.context("Loading existing config"))?;
        Ok(file.releases)
    }

    async fn delete(&self, record: &ReleaseRecord) -> Result<(), DeployError> {
        update(self.service.as_ref(), |file| {
            file.releases.retain(|r| r.id != record.id);
            file.current_release_ids.retain(|id| id != &record.id);
            Ok(())
        })
        .await
    }
}
