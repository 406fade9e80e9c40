//! In-memory state service.
//!
//! Keeps the document behind a mutex. Nothing survives the process; useful
//! for dry runs and for exercising the engine without a workspace on disk.

use crate::error::DeployError;
use crate::state::DeploymentFile;
use crate::store::service::{new_id, StateService};
use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryStateService {
    file: Mutex<Option<DeploymentFile>>,
}

impl MemoryStateService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document.
    pub fn with_file(file: DeploymentFile) -> Self {
        Self {
            file: Mutex::new(Some(file)),
        }
    }
}

#[async_trait]
impl StateService for MemoryStateService {
    async fn load(&self) -> Result<DeploymentFile, DeployError> {
        let mut guard = self.file.lock().await;
        let file = guard.get_or_insert_with(|| DeploymentFile::new(new_id()));
        Ok(file.clone())
    }

    async fn save(&self, file: &DeploymentFile) -> Result<(), DeployError> {
        *self.file.lock().await = Some(file.clone());
        Ok(())
    }
}
