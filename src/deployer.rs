//! Top-level deploy flow.

use crate::config::DeployerConfig;
use crate::error::{DeployError, ResultExt};
use crate::instance::InstanceManager;
use crate::release::ReleaseManager;
use crate::stage::{EventSink, Stage};
use crate::stemcell::{ExtractedStemcell, StemcellManager};
use crate::types::{Manifest, RegistryConfig, SshTunnelConfig};
use std::sync::Arc;

pub struct Deployer {
    stemcells: StemcellManager,
    releases: ReleaseManager,
    instances: InstanceManager,
    config: DeployerConfig,
}

impl Deployer {
    pub fn new(
        stemcells: StemcellManager,
        releases: ReleaseManager,
        instances: InstanceManager,
        config: DeployerConfig,
    ) -> Self {
        Self {
            stemcells,
            releases,
            instances,
            config,
        }
    }

    /// Converge the workspace onto `manifest`.
    ///
    /// Uploads the stemcell (once), replaces any existing instance with a
    /// fresh one, converges its disk, applies jobs, then deletes stemcells
    /// and release records nothing uses any more. There is no rollback: a
    /// failed run leaves the repositories describing exactly what exists,
    /// and re-running resumes from there.
    pub async fn deploy(
        &self,
        manifest: &Manifest,
        extracted_stemcell: &ExtractedStemcell,
        registry: &RegistryConfig,
        ssh_tunnel: &SshTunnelConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), DeployError> {
        let job = manifest.validate_single_instance()?;

        let upload_stage = Stage::new("uploading stemcell", sink.clone());
        upload_stage.start();
        let stemcell = self
            .stemcells
            .upload(extracted_stemcell, &upload_stage)
            .await
            .context("Uploading stemcell")?;
        upload_stage.finish();

        let stage = Stage::new("deploying", sink);
        stage.start();

        self.instances
            .delete_all(
                self.config.ping_timeout,
                self.config.ping_delay,
                self.config.skip_drain,
                &stage,
            )
            .await?;

        let (mut instance, _disks) = self
            .instances
            .create(&job.name, 0, manifest, &stemcell, registry, ssh_tunnel, &stage)
            .await
            .with_context(|| format!("Creating instance '{}/0'", job.name))?;

        instance.update_jobs(manifest, &stage).await?;

        self.releases
            .record(&manifest.releases)
            .await
            .context("Recording deployed releases")?;

        self.stemcells.delete_unused(&stage).await?;
        self.releases.delete_unused(&stage).await?;

        stage.finish();
        tracing::info!(deployment = %manifest.name, job = %job.name, "deployment converged");
        Ok(())
    }
}
