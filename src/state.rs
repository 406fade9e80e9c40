//! Deployment state document.
//!
//! The document is the complete record of what currently exists for one
//! deployment workspace. It's serializable and read-modify-written as a
//! whole; the repositories in [`crate::store`] are the only writers.

use crate::types::CloudProperties;
use serde::{Deserialize, Serialize};

/// A persistent disk the engine created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskRecord {
    pub id: String,
    pub cid: String,
    pub size: u64,
    #[serde(default)]
    pub cloud_properties: CloudProperties,
}

/// A stemcell uploaded to the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemcellRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub cid: String,
}

/// A release the deployment has used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub id: String,
    pub name: String,
    pub version: String,
}

/// The persisted root. One per workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentFile {
    /// Generated once on first load, never changes. Empty until minted.
    #[serde(default)]
    pub director_id: String,
    #[serde(default)]
    pub current_vm_cid: String,
    #[serde(default)]
    pub current_stemcell_id: String,
    #[serde(default)]
    pub current_disk_id: String,
    #[serde(default)]
    pub current_release_ids: Vec<String>,
    #[serde(default)]
    pub disks: Vec<DiskRecord>,
    #[serde(default)]
    pub stemcells: Vec<StemcellRecord>,
    #[serde(default)]
    pub releases: Vec<ReleaseRecord>,
}

impl DeploymentFile {
    /// A fresh document for an empty workspace.
    pub fn new(director_id: impl Into<String>) -> Self {
        Self {
            director_id: director_id.into(),
            ..Default::default()
        }
    }

    /// Has anything been deployed (or left behind) in this workspace?
    pub fn is_empty(&self) -> bool {
        self.current_vm_cid.is_empty()
            && self.current_stemcell_id.is_empty()
            && self.current_disk_id.is_empty()
            && self.disks.is_empty()
            && self.stemcells.is_empty()
    }

    pub fn current_disk(&self) -> Option<&DiskRecord> {
        if self.current_disk_id.is_empty() {
            return None;
        }
        self.disks.iter().find(|d| d.id == self.current_disk_id)
    }

    pub fn current_stemcell(&self) -> Option<&StemcellRecord> {
        if self.current_stemcell_id.is_empty() {
            return None;
        }
        self.stemcells
            .iter()
            .find(|s| s.id == self.current_stemcell_id)
    }
}
