//! Current VM record.

use crate::error::DeployError;
use crate::store::service::{update, StateService};
use async_trait::async_trait;
use std::sync::Arc;

/// Tracks the cid of the VM that is currently deployed. No history is kept.
#[async_trait]
pub trait VmRepo: Send + Sync {
    async fn find_current(&self) -> Result<Option<String>, DeployError>;
    async fn update_current(&self, cid: &str) -> Result<(), DeployError>;
    async fn clear_current(&self) -> Result<(), DeployError>;
}

pub struct VmRepository {
    service: Arc<dyn StateService>,
}

impl VmRepository {
    pub fn new(service: Arc<dyn StateService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl VmRepo for VmRepository {
    async fn find_current(&self) -> Result<Option<String>, DeployError> {
        let file = self
            .service
            .load()
            .await
            .map_err(|e| e.context("Loading existing config"))?;
        if file.current_vm_cid.is_empty() {
            return Ok(None);
        }
        Ok(Some(file.current_vm_cid))
    }

    async fn update_current(&self, cid: &str) -> Result<(), DeployError> {
        update(self.service.as_ref(), |file| {
            file.current_vm_cid = cid.to_string();
            Ok(())
        })
        .await
    }

    async fn clear_current(&self) -> Result<(), DeployError> {
        update(self.service.as_ref(), |file| {
            file.current_vm_cid.clear();
            Ok(())
        })
        .await
    }
}
