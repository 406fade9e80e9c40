//! Current-state repositories.
//!
//! This module contains:
//! - [`StateService`] trait + [`MemoryStateService`] / [`FileStateService`]: whole-document persistence
//! - [`VmRepo`], [`DiskRepo`], [`StemcellRepo`], [`ReleaseRepo`]: capability traits over the document
//! - [`Repositories`]: one of each, sharing a single state service
//!
//! Every repository call is one load-mutate-save cycle of the whole document.
//! There is no locking; one process owns a workspace at a time.

mod disk_repo;
mod memory;
mod release_repo;
mod service;
mod stemcell_repo;
mod vm_repo;

#[cfg(feature = "file-storage")]
pub mod file_backed;

pub use disk_repo::{DiskRepo, DiskRepository};
pub use memory::MemoryStateService;
pub use release_repo::{ReleaseRepo, ReleaseRepository};
pub use service::StateService;
pub use stemcell_repo::{StemcellRepo, StemcellRepository};
pub use vm_repo::{VmRepo, VmRepository};

#[cfg(feature = "file-storage")]
pub use file_backed::FileStateService;

use std::sync::Arc;

/// The four repositories of one workspace.
#[derive(Clone)]
pub struct Repositories {
    pub vms: Arc<dyn VmRepo>,
    pub disks: Arc<dyn DiskRepo>,
    pub stemcells: Arc<dyn StemcellRepo>,
    pub releases: Arc<dyn ReleaseRepo>,
}

impl Repositories {
    /// Build document-backed repositories over one state service.
    pub fn new(service: Arc<dyn StateService>) -> Self {
        Self {
            vms: Arc::new(VmRepository::new(service.clone())),
            disks: Arc::new(DiskRepository::new(service.clone())),
            stemcells: Arc::new(StemcellRepository::new(service.clone())),
            releases: Arc::new(ReleaseRepository::new(service)),
        }
    }

    /// Repositories over a fresh in-memory document.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStateService::new()))
    }
}
