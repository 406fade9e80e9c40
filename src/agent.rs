//! The agent seam: the management agent running on the VM.
//!
//! Transport is someone else's problem. The engine only needs these calls
//! plus the two polling loops built on top of them.

use crate::error::DeployError;
use crate::retry::{AttemptRetry, TimeoutRetry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Job configuration sent to the agent by `apply`.
///
/// Produced by a [`crate::instance::StateBuilder`]; opaque to the engine.
pub type ApplySpec = serde_json::Value;

/// Options passed along with a lifecycle script invocation.
pub type ScriptOptions = serde_json::Map<String, serde_json::Value>;

/// What the agent reports about its jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub job_state: String,
    /// Network settings the agent resolved (addresses, gateways), keyed by
    /// network name.
    #[serde(default)]
    pub networks: serde_json::Map<String, serde_json::Value>,
}

impl AgentState {
    pub fn is_running(&self) -> bool {
        self.job_state == "running"
    }
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Returns the agent's reply ("pong").
    async fn ping(&self) -> Result<String, DeployError>;
    async fn stop(&self) -> Result<(), DeployError>;
    async fn start(&self) -> Result<(), DeployError>;
    async fn apply(&self, spec: &ApplySpec) -> Result<(), DeployError>;
    async fn get_state(&self) -> Result<AgentState, DeployError>;
    /// Cloud ids of the disks the agent has mounted.
    async fn list_disk(&self) -> Result<Vec<String>, DeployError>;
    async fn mount_disk(&self, disk_cid: &str) -> Result<(), DeployError>;
    async fn unmount_disk(&self, disk_cid: &str) -> Result<(), DeployError>;
    /// Copy persistent data from the old disk onto the newly mounted one.
    async fn migrate_disk(&self) -> Result<(), DeployError>;
    /// Run the jobs' drain scripts and wait for them to finish.
    async fn drain(&self) -> Result<(), DeployError>;
    /// Run one lifecycle script (`pre-start`, `post-start`, `pre-stop`,
    /// `post-stop`) across all jobs on the VM.
    async fn run_script(&self, script: &str, options: &ScriptOptions) -> Result<(), DeployError>;

    /// Ping until the agent answers or `timeout` runs out.
    async fn wait_until_ready(&self, timeout: Duration, delay: Duration) -> Result<(), DeployError> {
        TimeoutRetry::new(timeout, delay)
            .run("agent ping", || self.ping(), |_| true)
            .await
            .map(|_| ())
            .map_err(|e| {
                DeployError::Timeout(format!("agent did not respond within {:?}: {}", timeout, e))
            })
    }

    /// Poll `get_state` until the jobs report running.
    async fn wait_to_be_running(&self, max_attempts: u32, delay: Duration) -> Result<(), DeployError> {
        AttemptRetry::new(max_attempts, delay)
            .run("agent get_state", move || async move {
                let state = self
                    .get_state()
                    .await
                    .map_err(|e| e.context("Sending get_state to agent"))?;
                if state.is_running() {
                    Ok(())
                } else {
                    Err(DeployError::Agent(format!(
                        "Received non-running job state: '{}'",
                        state.job_state
                    )))
                }
            })
            .await
    }
}
