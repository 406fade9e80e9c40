//! Where apply specs come from.

use crate::agent::{AgentState, ApplySpec};
use crate::error::DeployError;
use crate::types::Manifest;
use async_trait::async_trait;

/// Renders the job configuration an instance should run.
///
/// Template rendering and package compilation live behind this trait; the
/// engine only forwards the result to the agent. Rendering happens in two
/// passes: an initial spec that lets the agent bring up networking, then the
/// full spec built from what the agent resolved.
#[async_trait]
pub trait StateBuilder: Send + Sync {
    /// Spec applied before the agent has reported anything back.
    async fn build_initial_state(
        &self,
        job_name: &str,
        instance_id: u32,
        manifest: &Manifest,
    ) -> Result<ApplySpec, DeployError>;

    /// Final spec, rendered with the state the agent resolved from the
    /// initial one.
    async fn build(
        &self,
        job_name: &str,
        instance_id: u32,
        manifest: &Manifest,
        resolved: &AgentState,
    ) -> Result<ApplySpec, DeployError>;
}
