//! Minimal domain types for the deployment engine.
//!
//! These are the parts of a parsed deployment manifest the engine needs.
//! Parsing and validating the manifest document itself happens upstream.

use crate::error::DeployError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Free-form IaaS-specific properties passed through to the CPI.
pub type CloudProperties = Map<String, Value>;

/// Desired persistent disk for an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskPool {
    pub name: String,
    /// Size in MiB. Zero means no persistent disk.
    pub disk_size: u64,
    pub cloud_properties: Option<CloudProperties>,
}

impl DiskPool {
    pub fn cloud_properties_or_empty(&self) -> CloudProperties {
        self.cloud_properties.clone().unwrap_or_default()
    }
}

/// VM shape for a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcePool {
    pub name: String,
    #[serde(default)]
    pub cloud_properties: CloudProperties,
    #[serde(default)]
    pub env: CloudProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    #[serde(rename = "type")]
    pub network_type: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub cloud_properties: CloudProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub instances: u32,
    pub resource_pool: String,
    #[serde(default)]
    pub networks: Vec<String>,
    /// Size of an ad-hoc persistent disk (MiB), used when no pool is named.
    #[serde(default)]
    pub persistent_disk: u64,
    #[serde(default)]
    pub persistent_disk_pool: Option<String>,
}

/// Window (milliseconds) during which an updated instance must report running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchTime {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub update_watch_time: WatchTime,
}

/// A release the deployment runs, by name and version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseRef {
    pub name: String,
    pub version: String,
}

impl ReleaseRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Parsed deployment manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub releases: Vec<ReleaseRef>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub disk_pools: Vec<DiskPool>,
    #[serde(default)]
    pub resource_pools: Vec<ResourcePool>,
    #[serde(default)]
    pub networks: Vec<Network>,
    #[serde(default)]
    pub update: Update,
}

impl Manifest {
    /// Reject anything beyond one job with one instance.
    pub fn validate_single_instance(&self) -> Result<&Job, DeployError> {
        if self.jobs.len() != 1 {
            return Err(DeployError::Validation(format!(
                "There must only be one job, found {}",
                self.jobs.len()
            )));
        }
        let job = &self.jobs[0];
        if job.instances != 1 {
            return Err(DeployError::Validation(format!(
                "Job '{}' must have only one instance, found {}",
                job.name, job.instances
            )));
        }
        Ok(job)
    }

    /// Name of the single job, or empty if none is declared.
    pub fn job_name(&self) -> &str {
        self.jobs.first().map(|j| j.name.as_str()).unwrap_or_default()
    }

    fn job(&self, job_name: &str) -> Result<&Job, DeployError> {
        self.jobs
            .iter()
            .find(|j| j.name == job_name)
            .ok_or_else(|| DeployError::Validation(format!("Could not find job '{}'", job_name)))
    }

    /// Resolve the persistent disk a job asks for.
    ///
    /// The returned pool always carries cloud properties: a pool declared
    /// without any gets an empty set, so it compares equal to the disk it
    /// produced on the next deploy.
    pub fn disk_pool(&self, job_name: &str) -> Result<DiskPool, DeployError> {
        let job = self.job(job_name)?;

        if let Some(pool_name) = &job.persistent_disk_pool {
            return self
                .disk_pools
                .iter()
                .find(|p| &p.name == pool_name)
                .map(|p| DiskPool {
                    cloud_properties: Some(p.cloud_properties_or_empty()),
                    ..p.clone()
                })
                .ok_or_else(|| {
                    DeployError::Validation(format!(
                        "Could not find persistent disk pool '{}' for job '{}'",
                        pool_name, job_name
                    ))
                });
        }

        Ok(DiskPool {
            name: String::new(),
            disk_size: job.persistent_disk,
            cloud_properties: Some(CloudProperties::new()),
        })
    }

    pub fn resource_pool(&self, job_name: &str) -> Result<ResourcePool, DeployError> {
        let job = self.job(job_name)?;
        self.resource_pools
            .iter()
            .find(|p| p.name == job.resource_pool)
            .cloned()
            .ok_or_else(|| {
                DeployError::Validation(format!(
                    "Could not find resource pool '{}' for job '{}'",
                    job.resource_pool, job_name
                ))
            })
    }

    /// Network settings handed to the CPI, keyed by network name.
    pub fn network_interfaces(&self, job_name: &str) -> Result<BTreeMap<String, Value>, DeployError> {
        let job = self.job(job_name)?;
        let mut interfaces = BTreeMap::new();
        for name in &job.networks {
            let network = self.networks.iter().find(|n| &n.name == name).ok_or_else(|| {
                DeployError::Validation(format!(
                    "Could not find network '{}' for job '{}'",
                    name, job_name
                ))
            })?;
            interfaces.insert(
                network.name.clone(),
                serde_json::json!({
                    "type": network.network_type,
                    "ip": network.ip.clone().unwrap_or_default(),
                    "cloud_properties": network.cloud_properties,
                }),
            );
        }
        Ok(interfaces)
    }
}

/// Tunnel settings used to reach the registry/agent on a private network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTunnelConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub private_key: String,
}

impl SshTunnelConfig {
    pub fn is_empty(&self) -> bool {
        *self == SshTunnelConfig::default()
    }
}

/// Registry the agent reads its settings from during bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl RegistryConfig {
    pub fn is_empty(&self) -> bool {
        *self == RegistryConfig::default()
    }
}
