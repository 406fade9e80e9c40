//! Stemcell bookkeeping: upload once, promote, delete what is unused.

use crate::cloud::Cloud;
use crate::error::{CloudErrorKind, DeployError, ResultExt};
use crate::stage::{Stage, StepOutcome};
use crate::state::StemcellRecord;
use crate::store::StemcellRepo;
use crate::types::CloudProperties;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Metadata read from an unpacked stemcell tarball.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StemcellManifest {
    pub name: String,
    pub version: String,
    /// Path to the image inside the extracted tarball.
    pub image_path: String,
    #[serde(default)]
    pub cloud_properties: CloudProperties,
}

/// A stemcell unpacked on the local disk, ready to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedStemcell {
    pub manifest: StemcellManifest,
    pub extracted_path: String,
}

impl ExtractedStemcell {
    pub fn new(manifest: StemcellManifest, extracted_path: impl Into<String>) -> Self {
        Self {
            manifest,
            extracted_path: extracted_path.into(),
        }
    }
}

impl fmt::Display for ExtractedStemcell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExtractedStemcell{{name={} version={} path={}}}",
            self.manifest.name, self.manifest.version, self.extracted_path
        )
    }
}

/// A stemcell that exists in the cloud and in the repo.
#[derive(Clone)]
pub struct CloudStemcell {
    record: StemcellRecord,
    repo: Arc<dyn StemcellRepo>,
    cloud: Arc<dyn Cloud>,
}

impl fmt::Debug for CloudStemcell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudStemcell").field("record", &self.record).finish()
    }
}

impl CloudStemcell {
    pub fn new(record: StemcellRecord, repo: Arc<dyn StemcellRepo>, cloud: Arc<dyn Cloud>) -> Self {
        Self { record, repo, cloud }
    }

    pub fn cid(&self) -> &str {
        &self.record.cid
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn version(&self) -> &str {
        &self.record.version
    }

    pub fn record(&self) -> &StemcellRecord {
        &self.record
    }

    pub async fn promote_as_current(&self) -> Result<(), DeployError> {
        let found = self
            .repo
            .find(&self.record.name, &self.record.version)
            .await
            .context("Finding current stemcell")?
            .ok_or_else(|| {
                DeployError::InvalidState(format!(
                    "Stemcell does not exist in repo (cid={}, name={}, version={})",
                    self.record.cid, self.record.name, self.record.version
                ))
            })?;

        self.repo
            .update_current(&found.id)
            .await
            .context("Updating current stemcell record")
    }

    /// Delete from the cloud, then from the repo.
    ///
    /// A `StemcellNotFound` from the cloud still removes the record; the
    /// error is returned so callers can report a skip.
    pub async fn delete(&self) -> Result<(), DeployError> {
        let deleted = self.cloud.delete_stemcell(&self.record.cid).await;
        if let Err(err) = &deleted {
            if err.kind != CloudErrorKind::StemcellNotFound {
                return deleted.with_context(|| {
                    format!("Deleting stemcell '{}' in the cloud", self.record.cid)
                });
            }
        }

        self.repo
            .delete(&self.record)
            .await
            .context("Deleting stemcell from stemcell repo")?;

        deleted.map_err(DeployError::from)
    }
}

pub struct StemcellManager {
    repo: Arc<dyn StemcellRepo>,
    cloud: Arc<dyn Cloud>,
}

impl StemcellManager {
    pub fn new(repo: Arc<dyn StemcellRepo>, cloud: Arc<dyn Cloud>) -> Self {
        Self { repo, cloud }
    }

    fn wrap(&self, record: StemcellRecord) -> CloudStemcell {
        CloudStemcell::new(record, self.repo.clone(), self.cloud.clone())
    }

    pub async fn find_current(&self) -> Result<Option<CloudStemcell>, DeployError> {
        let record = self
            .repo
            .find_current()
            .await
            .context("Reading stemcell record")?;
        Ok(record.map(|r| self.wrap(r)))
    }

    /// Upload unless a stemcell with the same name and version is recorded.
    pub async fn upload(
        &self,
        extracted: &ExtractedStemcell,
        stage: &Stage,
    ) -> Result<CloudStemcell, DeployError> {
        let mut uploaded = None;

        stage
            .perform("Uploading", async {
                let manifest = &extracted.manifest;
                let existing = self
                    .repo
                    .find(&manifest.name, &manifest.version)
                    .await
                    .context("Finding existing stemcell record in repo")?;
                if let Some(record) = existing {
                    uploaded = Some(self.wrap(record));
                    return Ok(StepOutcome::Skipped("Stemcell already uploaded".into()));
                }

                tracing::debug!(name = %manifest.name, version = %manifest.version, "uploading stemcell");
                let cid = self
                    .cloud
                    .create_stemcell(&manifest.image_path, &manifest.cloud_properties)
                    .await
                    .with_context(|| {
                        format!("creating stemcell ({} {})", manifest.name, manifest.version)
                    })?;

                let record = self
                    .repo
                    .save(&manifest.name, &manifest.version, &cid)
                    .await
                    .with_context(|| {
                        format!(
                            "saving stemcell record in repo (cid={}, stemcell={})",
                            cid, extracted
                        )
                    })?;
                uploaded = Some(self.wrap(record));
                Ok(StepOutcome::Finished)
            })
            .await?;

        uploaded.ok_or_else(|| DeployError::InvalidState("stemcell upload produced no record".into()))
    }

    /// Every recorded stemcell except the current one.
    pub async fn find_unused(&self) -> Result<Vec<CloudStemcell>, DeployError> {
        let records = self
            .repo
            .all()
            .await
            .context("Getting all stemcell records")?;
        let current = self
            .repo
            .find_current()
            .await
            .context("Finding current stemcell record")?;

        Ok(records
            .into_iter()
            .filter(|r| current.as_ref().map_or(true, |c| c.id != r.id))
            .map(|r| self.wrap(r))
            .collect())
    }

    pub async fn delete_unused(&self, stage: &Stage) -> Result<(), DeployError> {
        let stemcells = self
            .find_unused()
            .await
            .context("Finding unused stemcells")?;

        for stemcell in stemcells {
            let step = format!("Deleting unused stemcell '{}'", stemcell.cid());
            stage
                .perform(&step, async { skip_not_found(stemcell.delete().await, CloudErrorKind::StemcellNotFound) })
                .await?;
        }
        Ok(())
    }
}

/// Turn a tolerated "already gone" cloud error into a skipped step.
pub(crate) fn skip_not_found(
    result: Result<(), DeployError>,
    kind: CloudErrorKind,
) -> Result<StepOutcome, DeployError> {
    match result {
        Ok(()) => Ok(StepOutcome::Finished),
        Err(err) if err.cloud_kind() == Some(kind) => Ok(StepOutcome::Skipped(err.to_string())),
        Err(err) => Err(err),
    }
}
