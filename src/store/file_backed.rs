//! File-backed state service.
//!
//! Stores the deployment state document as indented JSON, by default at
//! `~/.vm-deploy/deployment.json`.

use crate::error::DeployError;
use crate::state::DeploymentFile;
use crate::store::service::{new_id, StateService};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// File-backed implementation of [`StateService`].
///
/// A missing file is a fresh workspace: the first `load` mints a director id
/// and writes the file straight away.
pub struct FileStateService {
    path: PathBuf,
}

impl FileStateService {
    /// Create a service using the default path (`~/.vm-deploy/deployment.json`).
    pub async fn new_default() -> Result<Self, DeployError> {
        let home = dirs::home_dir()
            .ok_or_else(|| DeployError::Storage("could not determine home directory".into()))?;
        Self::new(home.join(".vm-deploy").join("deployment.json")).await
    }

    /// Create a service for a custom state file path.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self, DeployError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                DeployError::Storage(format!("failed to create state dir: {}", e))
            })?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateService for FileStateService {
    async fn load(&self) -> Result<DeploymentFile, DeployError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let file = DeploymentFile::new(new_id());
                tracing::info!(path = %self.path.display(), director_id = %file.director_id, "creating deployment state file");
                self.save(&file).await?;
                return Ok(file);
            }
            Err(e) => {
                return Err(DeployError::Storage(format!("failed to stat state file: {}", e)));
            }
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to read state file: {}", e)))?;

        let mut file: DeploymentFile = serde_json::from_str(&content)
            .map_err(|e| DeployError::Storage(format!("failed to parse state file: {}", e)))?;

        if file.director_id.is_empty() {
            file.director_id = new_id();
            self.save(&file).await?;
        }

        Ok(file)
    }

    async fn save(&self, file: &DeploymentFile) -> Result<(), DeployError> {
        let content = serde_json::to_string_pretty(file)
            .map_err(|e| DeployError::Storage(format!("failed to serialize state: {}", e)))?;

        // Write aside and rename so readers never see half a document.
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to write state file: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to replace state file: {}", e)))?;

        tracing::debug!(path = %self.path.display(), "saved deployment state");
        Ok(())
    }
}
