//! The cloud seam: Cloud Provider Interface.
//!
//! The engine never talks to an IaaS directly. Everything it creates or
//! destroys goes through this trait, and every failure comes back as a
//! [`CloudError`] with a kind the engine can match on.

use crate::error::CloudError;
use crate::types::CloudProperties;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-VM environment handed to `create_vm` (agent bootstrap settings).
pub type VmEnvironment = CloudProperties;

/// Network settings keyed by network name.
pub type Networks = BTreeMap<String, Value>;

/// Operations a concrete CPI must provide.
#[async_trait]
pub trait Cloud: Send + Sync {
    // ═══════════════════════════════════════════════════════════════
    // STEMCELLS
    // ═══════════════════════════════════════════════════════════════

    /// Upload a stemcell image. Returns its cloud id.
    async fn create_stemcell(
        &self,
        image_path: &str,
        cloud_properties: &CloudProperties,
    ) -> Result<String, CloudError>;

    async fn delete_stemcell(&self, stemcell_cid: &str) -> Result<(), CloudError>;

    // ═══════════════════════════════════════════════════════════════
    // VMS
    // ═══════════════════════════════════════════════════════════════

    /// Create a VM. Returns its cloud id.
    async fn create_vm(
        &self,
        agent_id: &str,
        stemcell_cid: &str,
        cloud_properties: &CloudProperties,
        disk_cids: &[String],
        networks: &Networks,
        env: &VmEnvironment,
    ) -> Result<String, CloudError>;

    async fn has_vm(&self, vm_cid: &str) -> Result<bool, CloudError>;

    /// Fails with `VmNotFound` when the VM is already gone.
    async fn delete_vm(&self, vm_cid: &str) -> Result<(), CloudError>;

    /// Optional; CPIs without metadata support return `NotImplemented`.
    async fn set_vm_metadata(
        &self,
        vm_cid: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), CloudError>;

    // ═══════════════════════════════════════════════════════════════
    // DISKS
    // ═══════════════════════════════════════════════════════════════

    /// Create a persistent disk near `vm_cid`. Size is in MiB.
    async fn create_disk(
        &self,
        size: u64,
        cloud_properties: &CloudProperties,
        vm_cid: &str,
    ) -> Result<String, CloudError>;

    /// Fails with `DiskNotFound` when the disk is already gone.
    async fn delete_disk(&self, disk_cid: &str) -> Result<(), CloudError>;

    async fn attach_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<(), CloudError>;

    async fn detach_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<(), CloudError>;
}
