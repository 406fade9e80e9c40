//! [`StateService`] trait definition.

use crate::error::DeployError;
use crate::state::DeploymentFile;
use async_trait::async_trait;

/// Loads and stores the whole deployment state document.
///
/// Implementations mint and persist a fresh `director_id` the first time
/// they are loaded against an empty workspace.
#[async_trait]
pub trait StateService: Send + Sync {
    /// Load the document, creating it if the workspace is empty.
    async fn load(&self) -> Result<DeploymentFile, DeployError>;

    /// Replace the persisted document.
    async fn save(&self, file: &DeploymentFile) -> Result<(), DeployError>;
}

/// Load, mutate and store the document in one cycle.
///
/// Nothing is written when `mutate` fails.
pub(crate) async fn update<T, F>(service: &dyn StateService, mutate: F) -> Result<T, DeployError>
where
    F: FnOnce(&mut DeploymentFile) -> Result<T, DeployError>,
{
    let mut file = service
        .load()
        .await
        .map_err(|e| e.context("Loading existing config"))?;

    let out = mutate(&mut file)?;

    service
        .save(&file)
        .await
        .map_err(|e| e.context("Saving new config"))?;

    Ok(out)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
