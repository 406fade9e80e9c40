//! Instance lifecycle.
//!
//! An instance is the deployment's single job instance sitting on one VM.
//! The durable facts (VM, disk, stemcell) live in the repositories; this
//! type only tracks how far the current run has taken it.

mod manager;
mod state_builder;

pub use manager::InstanceManager;
pub use state_builder::StateBuilder;

use crate::agent::ScriptOptions;
use crate::config::DeployerConfig;
use crate::disk::Disk;
use crate::error::{CloudErrorKind, DeployError, ResultExt};
use crate::sshtunnel::{SshTunnelFactory, SshTunnelOptions};
use crate::stage::{Stage, StepOutcome};
use crate::types::{Manifest, RegistryConfig, SshTunnelConfig, Update, WatchTime};
use crate::vm::Vm;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle position of an instance within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// No VM yet.
    Absent,
    /// VM created, agent not yet answering.
    Creating,
    /// Polling the agent.
    WaitingForAgent,
    /// Agent up, persistent disk converged.
    DisksUpdated,
    /// Jobs applied and reported running.
    Running,
    /// Jobs stopped, VM still there.
    Stopped,
    /// VM gone.
    Deleted,
}

impl InstanceState {
    pub fn name(&self) -> &'static str {
        match self {
            InstanceState::Absent => "absent",
            InstanceState::Creating => "creating",
            InstanceState::WaitingForAgent => "waiting_for_agent",
            InstanceState::DisksUpdated => "disks_updated",
            InstanceState::Running => "running",
            InstanceState::Stopped => "stopped",
            InstanceState::Deleted => "deleted",
        }
    }
}

pub struct Instance {
    job_name: String,
    id: u32,
    vm: Vm,
    tunnels: SshTunnelFactory,
    state_builder: Arc<dyn StateBuilder>,
    config: DeployerConfig,
    state: InstanceState,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("job_name", &self.job_name)
            .field("id", &self.id)
            .field("vm", &self.vm)
            .field("state", &self.state)
            .finish()
    }
}

impl Instance {
    pub fn new(
        job_name: impl Into<String>,
        id: u32,
        vm: Vm,
        tunnels: SshTunnelFactory,
        state_builder: Arc<dyn StateBuilder>,
        config: DeployerConfig,
        state: InstanceState,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            id,
            vm,
            tunnels,
            state_builder,
            config,
            state,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    fn transition(&mut self, next: InstanceState) {
        tracing::debug!(
            instance = %format!("{}/{}", self.job_name, self.id),
            from = self.state.name(),
            to = next.name(),
            "instance state"
        );
        self.state = next;
    }

    /// Disks the agent currently has mounted.
    pub async fn disks(&self) -> Result<Vec<String>, DeployError> {
        self.vm.disks().await.context("Listing instance disks")
    }

    /// Wait for the agent on a freshly created VM.
    ///
    /// When both a registry and an SSH tunnel are configured the tunnel is
    /// held open for the duration of the wait and always stopped afterwards.
    pub async fn wait_until_ready(
        &mut self,
        registry: &RegistryConfig,
        ssh_tunnel: &SshTunnelConfig,
        stage: &Stage,
    ) -> Result<(), DeployError> {
        self.transition(InstanceState::WaitingForAgent);

        let step = format!("Waiting for the agent on VM '{}' to be ready", self.vm.cid());
        let timeout = self.config.agent_ready_timeout;
        let delay = self.config.agent_ready_delay;

        stage
            .run(&step, async {
                if registry.is_empty() || ssh_tunnel.is_empty() {
                    return self.vm.wait_until_ready(timeout, delay).await;
                }

                let mut tunnel = self
                    .tunnels
                    .new_tunnel(SshTunnelOptions::for_registry(ssh_tunnel, registry));
                tunnel.start().await.context("Starting SSH tunnel")?;

                let result = self.vm.wait_until_ready(timeout, delay).await;

                if let Err(err) = tunnel.stop().await {
                    tracing::warn!(error = %err, "failed to stop SSH tunnel");
                }
                result
            })
            .await
    }

    pub async fn update_disks(&mut self, manifest: &Manifest, stage: &Stage) -> Result<Vec<Disk>, DeployError> {
        let disk_pool = manifest
            .disk_pool(&self.job_name)
            .context("Getting disk pool")?;

        let disks = self
            .vm
            .update_disks(&disk_pool, stage)
            .await
            .context("Updating disks")?;

        self.transition(InstanceState::DisksUpdated);
        Ok(disks)
    }

    /// Apply the job configuration and wait for it to report running.
    ///
    /// An initial spec goes first so the agent resolves its networking; the
    /// final spec is rendered from the state the agent reports back.
    pub async fn update_jobs(&mut self, manifest: &Manifest, stage: &Stage) -> Result<(), DeployError> {
        let initial = self
            .state_builder
            .build_initial_state(&self.job_name, self.id, manifest)
            .await
            .with_context(|| format!("Building initial state for instance '{}/{}'", self.job_name, self.id))?;

        self.vm
            .apply(&initial)
            .await
            .context("Applying the initial agent state")?;

        let resolved = self
            .vm
            .get_state()
            .await
            .with_context(|| format!("Getting state for instance '{}/{}'", self.job_name, self.id))?;

        let spec = self
            .state_builder
            .build(&self.job_name, self.id, manifest, &resolved)
            .await
            .with_context(|| format!("Building state for instance '{}/{}'", self.job_name, self.id))?;

        let step = format!("Updating instance '{}/{}'", self.job_name, self.id);
        stage
            .run(&step, async {
                self.vm.stop().await.context("Stopping the agent")?;
                self.vm.apply(&spec).await.context("Applying the agent state")?;
                self.vm
                    .run_script("pre-start", &ScriptOptions::new())
                    .await
                    .context("Running the pre-start script")?;
                self.vm.start().await.context("Starting the agent")
            })
            .await?;

        self.wait_until_jobs_are_running(manifest.update.update_watch_time, stage)
            .await?;
        self.run_script_in_step("post-start", stage).await?;

        self.transition(InstanceState::Running);
        Ok(())
    }

    /// Tear the instance down and delete its VM.
    ///
    /// An unreachable agent does not stop the teardown. A VM that is already
    /// gone is a skipped step.
    pub async fn delete(
        &mut self,
        ping_timeout: Duration,
        ping_delay: Duration,
        skip_drain: bool,
        stage: &Stage,
    ) -> Result<(), DeployError> {
        let exists = self.vm.exists().await.with_context(|| {
            format!("Checking existence of vm for instance '{}/{}'", self.job_name, self.id)
        })?;

        if exists {
            self.shutdown(ping_timeout, ping_delay, skip_drain, false, stage)
                .await?;
        }

        // a VM the cloud no longer knows still gets a delete call so the
        // CPI can release anything attached to it
        let step = format!("Deleting VM '{}'", self.vm.cid());
        stage
            .perform(&step, async {
                match self.vm.delete().await {
                    Ok(()) => Ok(StepOutcome::Finished),
                    Err(err) if err.cloud_kind() == Some(CloudErrorKind::VmNotFound) => {
                        Ok(StepOutcome::Skipped("VM not found".into()))
                    }
                    Err(err) => Err(err),
                }
            })
            .await?;

        self.transition(InstanceState::Deleted);
        Ok(())
    }

    /// Stop jobs, leaving disks mounted.
    pub async fn stop(
        &mut self,
        ping_timeout: Duration,
        ping_delay: Duration,
        skip_drain: bool,
        stage: &Stage,
    ) -> Result<(), DeployError> {
        self.shutdown(ping_timeout, ping_delay, skip_drain, true, stage)
            .await
    }

    /// Start jobs on an existing VM and wait for them to run.
    pub async fn start(
        &mut self,
        update: &Update,
        ping_timeout: Duration,
        ping_delay: Duration,
        stage: &Stage,
    ) -> Result<(), DeployError> {
        if let Err(err) = self.wait_for_agent(ping_timeout, ping_delay, stage).await {
            tracing::warn!(vm_cid = %self.vm.cid(), error = %err, "gave up waiting for agent");
            return Ok(());
        }

        self.run_script_in_step("pre-start", stage).await?;

        let step = format!("Starting the agent '{}/{}'", self.job_name, self.id);
        stage
            .run(&step, async { self.vm.start().await.context("Starting the agent") })
            .await?;

        self.wait_until_jobs_are_running(update.update_watch_time, stage)
            .await?;
        self.run_script_in_step("post-start", stage).await?;

        self.transition(InstanceState::Running);
        Ok(())
    }

    async fn shutdown(
        &mut self,
        ping_timeout: Duration,
        ping_delay: Duration,
        skip_drain: bool,
        skip_disk_unmount: bool,
        stage: &Stage,
    ) -> Result<(), DeployError> {
        if let Err(err) = self.wait_for_agent(ping_timeout, ping_delay, stage).await {
            tracing::warn!(vm_cid = %self.vm.cid(), error = %err, "gave up waiting for agent");
            return Ok(());
        }

        self.run_script_in_step("pre-stop", stage).await?;

        if !skip_drain {
            let step = format!("Draining jobs on instance '{}/{}'", self.job_name, self.id);
            stage.run(&step, self.vm.drain()).await?;
        }

        let step = format!("Stopping jobs on instance '{}/{}'", self.job_name, self.id);
        stage.run(&step, self.vm.stop()).await?;
        self.transition(InstanceState::Stopped);

        self.run_script_in_step("post-stop", stage).await?;

        if !skip_disk_unmount {
            self.unmount_disks(stage).await?;
        }
        Ok(())
    }

    async fn run_script_in_step(&self, script: &str, stage: &Stage) -> Result<(), DeployError> {
        let step = format!("Running the {} scripts '{}/{}'", script, self.job_name, self.id);
        stage
            .run(&step, async {
                self.vm
                    .run_script(script, &ScriptOptions::new())
                    .await
                    .with_context(|| format!("Running the {} script", script))
            })
            .await
    }

    async fn wait_for_agent(&self, ping_timeout: Duration, ping_delay: Duration, stage: &Stage) -> Result<(), DeployError> {
        let step = format!("Waiting for the agent on VM '{}'", self.vm.cid());
        stage
            .run(&step, async {
                self.vm
                    .wait_until_ready(ping_timeout, ping_delay)
                    .await
                    .context("Agent unreachable")
            })
            .await
    }

    async fn wait_until_jobs_are_running(&self, watch_time: WatchTime, stage: &Stage) -> Result<(), DeployError> {
        let start = Duration::from_millis(watch_time.start);
        let end = Duration::from_millis(watch_time.end);
        let delay = self.config.running_poll_delay;
        let max_attempts = watch_attempts(start, end, delay);

        let step = format!("Waiting for instance '{}/{}' to be running", self.job_name, self.id);
        stage
            .run(&step, async {
                tokio::time::sleep(start).await;
                self.vm.wait_to_be_running(max_attempts, delay).await
            })
            .await
    }

    async fn unmount_disks(&self, stage: &Stage) -> Result<(), DeployError> {
        let disks = self
            .vm
            .disks()
            .await
            .with_context(|| format!("Getting VM '{}' disks", self.vm.cid()))?;

        for disk_cid in disks {
            let step = format!("Unmounting disk '{}'", disk_cid);
            stage
                .run(&step, async {
                    self.vm.unmount_disk(&disk_cid).await.with_context(|| {
                        format!("Unmounting disk '{}' from VM '{}'", disk_cid, self.vm.cid())
                    })
                })
                .await?;
        }
        Ok(())
    }
}

/// Polls that fit between `start` and `end` at one per `delay`.
fn watch_attempts(start: Duration, end: Duration, delay: Duration) -> u32 {
    let attempts = end.saturating_sub(start).as_millis() / delay.as_millis().max(1);
    u32::try_from(attempts).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests;
