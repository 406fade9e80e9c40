//! Release bookkeeping.
//!
//! Releases have no cloud-side resource; the records only say which
//! releases the deployment currently runs.

use crate::error::{DeployError, ResultExt};
use crate::stage::{Stage, StepOutcome};
use crate::state::ReleaseRecord;
use crate::store::ReleaseRepo;
use crate::types::ReleaseRef;
use std::sync::Arc;

pub struct ReleaseManager {
    repo: Arc<dyn ReleaseRepo>,
}

impl ReleaseManager {
    pub fn new(repo: Arc<dyn ReleaseRepo>) -> Self {
        Self { repo }
    }

    pub async fn find_current(&self) -> Result<Vec<ReleaseRecord>, DeployError> {
        self.repo
            .find_current()
            .await
            .context("Finding current release records")
    }

    /// Record `releases` (reusing existing records) and make exactly that
    /// set current.
    pub async fn record(&self, releases: &[ReleaseRef]) -> Result<Vec<ReleaseRecord>, DeployError> {
        let mut records = Vec::with_capacity(releases.len());
        for release in releases {
            let existing = self
                .repo
                .find(&release.name, &release.version)
                .await
                .with_context(|| format!("Finding release record '{}/{}'", release.name, release.version))?;
            let record = match existing {
                Some(record) => record,
                None => self
                    .repo
                    .save(&release.name, &release.version)
                    .await
                    .with_context(|| {
                        format!("Saving release record '{}/{}'", release.name, release.version)
                    })?,
            };
            records.push(record);
        }

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        self.repo
            .update_current(&ids)
            .await
            .context("Updating current release records")?;

        Ok(records)
    }

    pub async fn find_unused(&self) -> Result<Vec<ReleaseRecord>, DeployError> {
        let all = self.repo.all().await.context("Getting all release records")?;
        let current = self.find_current().await?;
        Ok(all
            .into_iter()
            .filter(|r| !current.iter().any(|c| c.id == r.id))
            .collect())
    }

    pub async fn delete_unused(&self, stage: &Stage) -> Result<(), DeployError> {
        for release in self.find_unused().await? {
            let step = format!("Deleting unused release '{}/{}'", release.name, release.version);
            stage
                .perform(&step, async {
                    self.repo
                        .delete(&release)
                        .await
                        .context("Deleting release record")?;
                    Ok(StepOutcome::Finished)
                })
                .await?;
        }
        Ok(())
    }
}
