//! Wiring: builds every manager from one set of collaborators.

use crate::agent::AgentClient;
use crate::cloud::Cloud;
use crate::config::DeployerConfig;
use crate::deployer::Deployer;
use crate::deployment::DeploymentManager;
use crate::disk::DiskManager;
use crate::instance::{InstanceManager, StateBuilder};
use crate::release::ReleaseManager;
use crate::sshtunnel::{SshConnector, SshTunnelFactory};
use crate::stemcell::StemcellManager;
use crate::store::Repositories;
use crate::vm::{DiskDeployer, VmManager};
use std::sync::Arc;

/// Everything a run talks to: the workspace repositories, the cloud, the
/// agent, the job renderer and the SSH transport.
#[derive(Clone)]
pub struct ManagerFactory {
    pub repos: Repositories,
    pub cloud: Arc<dyn Cloud>,
    pub agent: Arc<dyn AgentClient>,
    pub state_builder: Arc<dyn StateBuilder>,
    pub tunnels: SshTunnelFactory,
    pub config: DeployerConfig,
}

impl ManagerFactory {
    pub fn new(
        repos: Repositories,
        cloud: Arc<dyn Cloud>,
        agent: Arc<dyn AgentClient>,
        state_builder: Arc<dyn StateBuilder>,
        ssh: Arc<dyn SshConnector>,
        config: DeployerConfig,
    ) -> Self {
        let tunnels = SshTunnelFactory::new(ssh, &config);
        Self {
            repos,
            cloud,
            agent,
            state_builder,
            tunnels,
            config,
        }
    }

    pub fn stemcell_manager(&self) -> StemcellManager {
        StemcellManager::new(self.repos.stemcells.clone(), self.cloud.clone())
    }

    pub fn release_manager(&self) -> ReleaseManager {
        ReleaseManager::new(self.repos.releases.clone())
    }

    pub fn disk_manager(&self) -> DiskManager {
        DiskManager::new(self.cloud.clone(), self.repos.disks.clone())
    }

    pub fn disk_deployer(&self) -> DiskDeployer {
        DiskDeployer::new(self.disk_manager(), self.repos.disks.clone())
    }

    pub fn vm_manager(&self) -> VmManager {
        VmManager::new(
            self.repos.clone(),
            Arc::new(self.disk_deployer()),
            self.agent.clone(),
            self.cloud.clone(),
        )
    }

    pub fn instance_manager(&self) -> InstanceManager {
        InstanceManager::new(
            Arc::new(self.vm_manager()),
            self.tunnels.clone(),
            self.state_builder.clone(),
            self.config.clone(),
        )
    }

    pub fn deployment_manager(&self) -> DeploymentManager {
        DeploymentManager::new(
            self.instance_manager(),
            self.disk_manager(),
            self.stemcell_manager(),
            self.release_manager(),
            self.config.clone(),
        )
    }

    pub fn deployer(&self) -> Deployer {
        Deployer::new(
            self.stemcell_manager(),
            self.release_manager(),
            self.instance_manager(),
            self.config.clone(),
        )
    }
}
