//! VM Deploy Library
//!
//! Reconciliation engine for single-VM deployments. Given a manifest and an
//! extracted stemcell it uploads the stemcell once, replaces the deployment's
//! VM, converges its persistent disk (migrating data when the disk shape
//! changes), applies jobs through the agent and deletes whatever is no
//! longer used.
//!
//! # Design
//!
//! The engine is not coupled to any particular IaaS, agent transport or SSH
//! implementation. You implement [`Cloud`], [`AgentClient`], [`SshConnector`]
//! and [`StateBuilder`] for your infrastructure; the engine owns ordering,
//! retries, progress reporting and the current-state document.
//!
//! The state document is rewritten after every mutation, so a run that
//! fails part-way leaves it describing exactly what exists. Re-running
//! resumes from there.
//!
//! # Usage
//!
//! ```ignore
//! use vm_deploy_rs::{
//!     DeployerConfig, FileStateService, LoggingReporter, ManagerFactory, Repositories,
//! };
//!
//! let service = FileStateService::new_default().await?;
//! let repos = Repositories::new(Arc::new(service));
//! let factory = ManagerFactory::new(repos, cloud, agent, state_builder, ssh, DeployerConfig::default());
//!
//! factory
//!     .deployer()
//!     .deploy(&manifest, &extracted_stemcell, &registry, &ssh_tunnel, Arc::new(LoggingReporter))
//!     .await?;
//! ```

pub mod agent;
pub mod cloud;
pub mod config;
pub mod deployer;
pub mod deployment;
pub mod disk;
pub mod error;
pub mod factory;
pub mod instance;
pub mod release;
pub mod retry;
pub mod sshtunnel;
pub mod stage;
pub mod state;
pub mod stemcell;
pub mod store;
pub mod types;
pub mod vm;

#[cfg(test)]
pub(crate) mod testing;

// Re-export the main types at crate root for convenience
pub use agent::{AgentClient, AgentState, ApplySpec, ScriptOptions};
pub use cloud::{Cloud, Networks, VmEnvironment};
pub use config::DeployerConfig;
pub use deployer::Deployer;
pub use deployment::{Deployment, DeploymentManager};
pub use disk::{Disk, DiskManager};
pub use error::{CloudError, CloudErrorKind, DeployError, ResultExt, SshError};
pub use factory::ManagerFactory;
pub use instance::{Instance, InstanceManager, InstanceState, StateBuilder};
pub use release::ReleaseManager;
pub use sshtunnel::{
    SshConnector, SshSession, SshTunnel, SshTunnelFactory, SshTunnelOptions,
};
pub use stage::{
    EventSink, EventState, LoggingReporter, MemoryReporter, Stage, StdoutReporter, StepEvent,
    StepOutcome,
};
pub use state::{DeploymentFile, DiskRecord, ReleaseRecord, StemcellRecord};
pub use stemcell::{CloudStemcell, ExtractedStemcell, StemcellManager, StemcellManifest};
#[cfg(feature = "file-storage")]
pub use store::FileStateService;
pub use store::{MemoryStateService, Repositories, StateService};
pub use types::*;
pub use vm::{Vm, VmManager};
