//! In-memory stand-ins for the cloud, the agent and SSH, plus fixtures.

use crate::agent::{AgentClient, AgentState, ApplySpec, ScriptOptions};
use crate::cloud::{Cloud, Networks, VmEnvironment};
use crate::config::DeployerConfig;
use crate::deployer::Deployer;
use crate::deployment::DeploymentManager;
use crate::disk::DiskManager;
use crate::error::{CloudError, CloudErrorKind, DeployError, SshError};
use crate::factory::ManagerFactory;
use crate::instance::{InstanceManager, StateBuilder};
use crate::sshtunnel::{SshConnector, SshSession, SshTunnelOptions};
use crate::stage::{MemoryReporter, Stage};
use crate::stemcell::{CloudStemcell, ExtractedStemcell, StemcellManifest};
use crate::store::Repositories;
use crate::types::{
    CloudProperties, DiskPool, Job, Manifest, Network, ReleaseRef, ResourcePool, Update, WatchTime,
};
use crate::vm::{Vm, VmManager};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

// ═══════════════════════════════════════════════════════════════════
// CLOUD
// ═══════════════════════════════════════════════════════════════════

#[derive(Default)]
struct CloudInner {
    next_id: u32,
    stemcells: BTreeSet<String>,
    vms: BTreeSet<String>,
    disks: BTreeSet<String>,
    attachments: BTreeSet<(String, String)>,
    metadata: BTreeMap<String, BTreeMap<String, String>>,
    vm_disk_hints: BTreeMap<String, Vec<String>>,
    deleted_disks: Vec<String>,
    calls: Vec<String>,
    fail_next: HashMap<String, CloudError>,
    fail_for: HashMap<(String, String), CloudError>,
}

impl CloudInner {
    fn mint(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}-cid-{}", kind, self.next_id)
    }

    fn enter(&mut self, method: &str, cid: &str) -> Result<(), CloudError> {
        self.calls.push(method.to_string());
        if let Some(err) = self.fail_next.remove(method) {
            return Err(err);
        }
        if let Some(err) = self.fail_for.get(&(method.to_string(), cid.to_string())) {
            return Err(err.clone());
        }
        Ok(())
    }
}

/// Stateful CPI: resources exist from their create call until deleted.
#[derive(Default)]
pub struct FakeCloud {
    inner: Mutex<CloudInner>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CloudInner> {
        self.inner.lock().unwrap()
    }

    pub fn calls_named(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == method).count()
    }

    /// Fail the next call to `method` only.
    pub fn fail_next(&self, method: &str, kind: CloudErrorKind, message: &str) {
        self.lock()
            .fail_next
            .insert(method.to_string(), CloudError::new(method, kind, message));
    }

    /// Fail every call to `method` targeting `cid`.
    pub fn fail_for(&self, method: &str, cid: &str, err: CloudError) {
        self.lock()
            .fail_for
            .insert((method.to_string(), cid.to_string()), err);
    }

    pub fn add_vm(&self, cid: &str) {
        self.lock().vms.insert(cid.to_string());
    }

    pub fn forget_vm(&self, cid: &str) {
        self.lock().vms.remove(cid);
    }

    pub fn has_vm_now(&self, cid: &str) -> bool {
        self.lock().vms.contains(cid)
    }

    pub fn add_disk(&self, cid: &str) {
        self.lock().disks.insert(cid.to_string());
    }

    pub fn forget_disk(&self, cid: &str) {
        self.lock().disks.remove(cid);
    }

    pub fn has_disk(&self, cid: &str) -> bool {
        self.lock().disks.contains(cid)
    }

    pub fn has_stemcell(&self, cid: &str) -> bool {
        self.lock().stemcells.contains(cid)
    }

    pub fn forget_stemcell(&self, cid: &str) {
        self.lock().stemcells.remove(cid);
    }

    pub fn deleted_disks(&self) -> Vec<String> {
        self.lock().deleted_disks.clone()
    }

    pub fn is_attached(&self, vm_cid: &str, disk_cid: &str) -> bool {
        self.lock()
            .attachments
            .contains(&(vm_cid.to_string(), disk_cid.to_string()))
    }

    pub fn vm_metadata(&self, cid: &str) -> BTreeMap<String, String> {
        self.lock().metadata.get(cid).cloned().unwrap_or_default()
    }

    /// Disk cids passed to `create_vm` for `cid`.
    pub fn vm_disk_hints(&self, cid: &str) -> Vec<String> {
        self.lock().vm_disk_hints.get(cid).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Cloud for FakeCloud {
    async fn create_stemcell(&self, _image_path: &str, _props: &CloudProperties) -> Result<String, CloudError> {
        let mut inner = self.lock();
        inner.enter("create_stemcell", "")?;
        let cid = inner.mint("stemcell");
        inner.stemcells.insert(cid.clone());
        Ok(cid)
    }

    async fn delete_stemcell(&self, stemcell_cid: &str) -> Result<(), CloudError> {
        let mut inner = self.lock();
        inner.enter("delete_stemcell", stemcell_cid)?;
        if !inner.stemcells.remove(stemcell_cid) {
            return Err(CloudError::new(
                "delete_stemcell",
                CloudErrorKind::StemcellNotFound,
                format!("stemcell '{}' not found", stemcell_cid),
            ));
        }
        Ok(())
    }

    async fn create_vm(
        &self,
        _agent_id: &str,
        stemcell_cid: &str,
        _props: &CloudProperties,
        disk_cids: &[String],
        _networks: &Networks,
        _env: &VmEnvironment,
    ) -> Result<String, CloudError> {
        let mut inner = self.lock();
        inner.enter("create_vm", stemcell_cid)?;
        let cid = inner.mint("vm");
        inner.vms.insert(cid.clone());
        inner.vm_disk_hints.insert(cid.clone(), disk_cids.to_vec());
        Ok(cid)
    }

    async fn has_vm(&self, vm_cid: &str) -> Result<bool, CloudError> {
        let mut inner = self.lock();
        inner.enter("has_vm", vm_cid)?;
        Ok(inner.vms.contains(vm_cid))
    }

    async fn delete_vm(&self, vm_cid: &str) -> Result<(), CloudError> {
        let mut inner = self.lock();
        inner.enter("delete_vm", vm_cid)?;
        if !inner.vms.remove(vm_cid) {
            return Err(CloudError::new(
                "delete_vm",
                CloudErrorKind::VmNotFound,
                format!("vm '{}' not found", vm_cid),
            ));
        }
        inner.attachments.retain(|(vm, _)| vm != vm_cid);
        Ok(())
    }

    async fn set_vm_metadata(&self, vm_cid: &str, metadata: &BTreeMap<String, String>) -> Result<(), CloudError> {
        let mut inner = self.lock();
        inner.enter("set_vm_metadata", vm_cid)?;
        inner.metadata.insert(vm_cid.to_string(), metadata.clone());
        Ok(())
    }

    async fn create_disk(&self, _size: u64, _props: &CloudProperties, vm_cid: &str) -> Result<String, CloudError> {
        let mut inner = self.lock();
        inner.enter("create_disk", vm_cid)?;
        let cid = inner.mint("disk");
        inner.disks.insert(cid.clone());
        Ok(cid)
    }

    async fn delete_disk(&self, disk_cid: &str) -> Result<(), CloudError> {
        let mut inner = self.lock();
        inner.enter("delete_disk", disk_cid)?;
        if !inner.disks.remove(disk_cid) {
            return Err(CloudError::new(
                "delete_disk",
                CloudErrorKind::DiskNotFound,
                format!("disk '{}' not found", disk_cid),
            ));
        }
        inner.attachments.retain(|(_, disk)| disk != disk_cid);
        inner.deleted_disks.push(disk_cid.to_string());
        Ok(())
    }

    async fn attach_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<(), CloudError> {
        let mut inner = self.lock();
        inner.enter("attach_disk", disk_cid)?;
        if !inner.vms.contains(vm_cid) {
            return Err(CloudError::new("attach_disk", CloudErrorKind::VmNotFound, vm_cid));
        }
        if !inner.disks.contains(disk_cid) {
            return Err(CloudError::new("attach_disk", CloudErrorKind::DiskNotFound, disk_cid));
        }
        inner
            .attachments
            .insert((vm_cid.to_string(), disk_cid.to_string()));
        Ok(())
    }

    async fn detach_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<(), CloudError> {
        let mut inner = self.lock();
        inner.enter("detach_disk", disk_cid)?;
        inner
            .attachments
            .remove(&(vm_cid.to_string(), disk_cid.to_string()));
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════
// AGENT
// ═══════════════════════════════════════════════════════════════════

#[derive(Default)]
struct AgentInner {
    calls: Vec<String>,
    ping_failures: u32,
    job_states: Vec<String>,
    fail_next: HashMap<String, String>,
    mounted: Vec<String>,
    applied: Vec<ApplySpec>,
    networks: serde_json::Map<String, Value>,
}

impl AgentInner {
    fn enter(&mut self, method: &str) -> Result<(), DeployError> {
        self.calls.push(method.to_string());
        match self.fail_next.remove(method) {
            Some(msg) => Err(DeployError::Agent(msg)),
            None => Ok(()),
        }
    }
}

/// Agent that answers immediately; jobs report running unless told otherwise.
#[derive(Default)]
pub struct FakeAgent {
    inner: Mutex<AgentInner>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AgentInner> {
        self.inner.lock().unwrap()
    }

    pub fn fail_pings(&self, count: u32) {
        self.lock().ping_failures = count;
    }

    /// States returned by successive `get_state` calls; the last one repeats.
    pub fn set_job_states(&self, states: &[&str]) {
        self.lock().job_states = states.iter().map(|s| s.to_string()).collect();
    }

    pub fn fail_next(&self, method: &str, message: &str) {
        self.lock()
            .fail_next
            .insert(method.to_string(), message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn calls_named(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == method).count()
    }

    pub fn mounted(&self) -> Vec<String> {
        self.lock().mounted.clone()
    }

    pub fn applied(&self) -> Vec<ApplySpec> {
        self.lock().applied.clone()
    }

    /// Networks reported by `get_state`.
    pub fn set_networks(&self, networks: Value) {
        if let Value::Object(map) = networks {
            self.lock().networks = map;
        }
    }
}

#[async_trait]
impl AgentClient for FakeAgent {
    async fn ping(&self) -> Result<String, DeployError> {
        let mut inner = self.lock();
        inner.enter("ping")?;
        if inner.ping_failures > 0 {
            inner.ping_failures -= 1;
            return Err(DeployError::Agent("connection refused".into()));
        }
        Ok("pong".into())
    }

    async fn stop(&self) -> Result<(), DeployError> {
        self.lock().enter("stop")
    }

    async fn start(&self) -> Result<(), DeployError> {
        self.lock().enter("start")
    }

    async fn apply(&self, spec: &ApplySpec) -> Result<(), DeployError> {
        let mut inner = self.lock();
        inner.enter("apply")?;
        inner.applied.push(spec.clone());
        Ok(())
    }

    async fn get_state(&self) -> Result<AgentState, DeployError> {
        let mut inner = self.lock();
        inner.enter("get_state")?;
        let job_state = match inner.job_states.len() {
            0 => "running".to_string(),
            1 => inner.job_states[0].clone(),
            _ => inner.job_states.remove(0),
        };
        Ok(AgentState {
            job_state,
            networks: inner.networks.clone(),
        })
    }

    async fn list_disk(&self) -> Result<Vec<String>, DeployError> {
        let mut inner = self.lock();
        inner.enter("list_disk")?;
        Ok(inner.mounted.clone())
    }

    async fn mount_disk(&self, disk_cid: &str) -> Result<(), DeployError> {
        let mut inner = self.lock();
        inner.enter("mount_disk")?;
        if !inner.mounted.iter().any(|d| d == disk_cid) {
            inner.mounted.push(disk_cid.to_string());
        }
        Ok(())
    }

    async fn unmount_disk(&self, disk_cid: &str) -> Result<(), DeployError> {
        let mut inner = self.lock();
        inner.enter("unmount_disk")?;
        inner.mounted.retain(|d| d != disk_cid);
        Ok(())
    }

    async fn migrate_disk(&self) -> Result<(), DeployError> {
        self.lock().enter("migrate_disk")
    }

    async fn drain(&self) -> Result<(), DeployError> {
        self.lock().enter("drain")
    }

    /// Recorded as `run_script:<script>`.
    async fn run_script(&self, script: &str, _options: &ScriptOptions) -> Result<(), DeployError> {
        self.lock().enter(&format!("run_script:{}", script))
    }
}

// ═══════════════════════════════════════════════════════════════════
// SSH
// ═══════════════════════════════════════════════════════════════════

#[derive(Default)]
struct SshInner {
    failures: VecDeque<String>,
    attempts: u32,
    forwards: Vec<(u16, u16)>,
    closed: u32,
}

/// Connector whose sessions forward nothing and close on shutdown.
#[derive(Default)]
pub struct FakeSshConnector {
    inner: Arc<Mutex<SshInner>>,
}

impl FakeSshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next connection attempts with these messages, in order.
    pub fn fail_with(&self, messages: &[&str]) {
        self.inner.lock().unwrap().failures = messages.iter().map(|m| m.to_string()).collect();
    }

    pub fn connect_attempts(&self) -> u32 {
        self.inner.lock().unwrap().attempts
    }

    pub fn forwards(&self) -> Vec<(u16, u16)> {
        self.inner.lock().unwrap().forwards.clone()
    }

    pub fn closed_sessions(&self) -> u32 {
        self.inner.lock().unwrap().closed
    }
}

#[async_trait]
impl SshConnector for FakeSshConnector {
    async fn connect(&self, _options: &SshTunnelOptions) -> Result<Box<dyn SshSession>, SshError> {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts += 1;
        if let Some(msg) = inner.failures.pop_front() {
            return Err(SshError(msg));
        }
        Ok(Box::new(FakeSshSession {
            inner: self.inner.clone(),
        }))
    }
}

struct FakeSshSession {
    inner: Arc<Mutex<SshInner>>,
}

#[async_trait]
impl SshSession for FakeSshSession {
    async fn forward(
        &mut self,
        remote_port: u16,
        local_port: u16,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SshError> {
        self.inner
            .lock()
            .unwrap()
            .forwards
            .push((remote_port, local_port));

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        self.inner.lock().unwrap().closed += 1;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════
// STATE BUILDER
// ═══════════════════════════════════════════════════════════════════

/// Renders a tiny spec naming the job and deployment. Initial specs carry
/// `"initial": true`; final ones echo the resolved networks.
#[derive(Default)]
pub struct FakeStateBuilder {
    failure: Mutex<Option<String>>,
}

impl FakeStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the final `build`; the initial state still renders.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl StateBuilder for FakeStateBuilder {
    async fn build_initial_state(
        &self,
        job_name: &str,
        instance_id: u32,
        manifest: &Manifest,
    ) -> Result<ApplySpec, DeployError> {
        Ok(serde_json::json!({
            "deployment": manifest.name,
            "job": job_name,
            "index": instance_id,
            "initial": true,
        }))
    }

    async fn build(
        &self,
        job_name: &str,
        instance_id: u32,
        manifest: &Manifest,
        resolved: &AgentState,
    ) -> Result<ApplySpec, DeployError> {
        if let Some(msg) = self.failure.lock().unwrap().clone() {
            return Err(DeployError::Validation(msg));
        }
        Ok(serde_json::json!({
            "deployment": manifest.name,
            "job": job_name,
            "index": instance_id,
            "networks": resolved.networks,
        }))
    }
}

// ═══════════════════════════════════════════════════════════════════
// FIXTURES
// ═══════════════════════════════════════════════════════════════════

pub fn props(pairs: &[(&str, &str)]) -> CloudProperties {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

pub fn disk_pool(size: u64) -> DiskPool {
    DiskPool {
        name: "fast".into(),
        disk_size: size,
        cloud_properties: Some(props(&[("type", "ssd")])),
    }
}

/// One job `director` with a 1024 MiB disk and a 3s running window.
pub fn manifest() -> Manifest {
    Manifest {
        name: "test-deployment".into(),
        releases: vec![ReleaseRef::new("bosh", "255.3")],
        jobs: vec![Job {
            name: "director".into(),
            instances: 1,
            resource_pool: "default".into(),
            networks: vec!["private".into()],
            persistent_disk: 0,
            persistent_disk_pool: Some("fast".into()),
        }],
        disk_pools: vec![disk_pool(1024)],
        resource_pools: vec![ResourcePool {
            name: "default".into(),
            cloud_properties: props(&[("instance_type", "m1.small")]),
            env: CloudProperties::new(),
        }],
        networks: vec![Network {
            name: "private".into(),
            network_type: "manual".into(),
            ip: Some("10.0.0.6".into()),
            cloud_properties: CloudProperties::new(),
        }],
        update: Update {
            update_watch_time: WatchTime { start: 0, end: 3000 },
        },
    }
}

pub fn extracted_stemcell(name: &str, version: &str) -> ExtractedStemcell {
    ExtractedStemcell::new(
        StemcellManifest {
            name: name.into(),
            version: version.into(),
            image_path: "/stemcell/image".into(),
            cloud_properties: CloudProperties::new(),
        },
        "/tmp/extracted-stemcell",
    )
}

/// One workspace wired to fakes.
pub struct Harness {
    pub repos: Repositories,
    pub cloud: Arc<FakeCloud>,
    pub agent: Arc<FakeAgent>,
    pub ssh: Arc<FakeSshConnector>,
    pub state_builder: Arc<FakeStateBuilder>,
    pub factory: ManagerFactory,
}

impl Harness {
    pub fn new() -> Self {
        let repos = Repositories::in_memory();
        let cloud = Arc::new(FakeCloud::new());
        let agent = Arc::new(FakeAgent::new());
        let ssh = Arc::new(FakeSshConnector::new());
        let state_builder = Arc::new(FakeStateBuilder::new());
        let factory = ManagerFactory::new(
            repos.clone(),
            cloud.clone(),
            agent.clone(),
            state_builder.clone(),
            ssh.clone(),
            DeployerConfig::default(),
        );
        Self {
            repos,
            cloud,
            agent,
            ssh,
            state_builder,
            factory,
        }
    }

    /// A VM known to the cloud but not recorded anywhere.
    pub async fn create_vm(&self, cid: &str) -> Vm {
        self.cloud.add_vm(cid);
        Vm::new(
            cid,
            self.repos.vms.clone(),
            self.repos.stemcells.clone(),
            Arc::new(self.factory.disk_deployer()),
            self.agent.clone(),
            self.cloud.clone(),
        )
    }

    pub async fn upload_stemcell(&self, name: &str, version: &str) -> CloudStemcell {
        let stage = Stage::new("uploading stemcell", Arc::new(MemoryReporter::new()));
        self.factory
            .stemcell_manager()
            .upload(&extracted_stemcell(name, version), &stage)
            .await
            .unwrap()
    }

    pub fn vm_manager(&self) -> VmManager {
        self.factory.vm_manager()
    }

    pub fn disk_manager(&self) -> DiskManager {
        self.factory.disk_manager()
    }

    pub fn instance_manager(&self) -> InstanceManager {
        self.factory.instance_manager()
    }

    pub fn deployment_manager(&self) -> DeploymentManager {
        self.factory.deployment_manager()
    }

    pub fn deployer(&self) -> Deployer {
        self.factory.deployer()
    }
}
