use super::*;
use crate::agent::AgentClient;
use crate::stage::{EventState, MemoryReporter};
use crate::testing::{manifest, Harness};
use std::time::Duration;

const PING_TIMEOUT: Duration = Duration::from_secs(10);
const PING_DELAY: Duration = Duration::from_millis(500);

fn stage() -> (Arc<MemoryReporter>, Stage) {
    let reporter = Arc::new(MemoryReporter::new());
    (reporter.clone(), Stage::new("deploying", reporter))
}

fn registry() -> RegistryConfig {
    RegistryConfig {
        username: "admin".into(),
        password: "secret".into(),
        host: "127.0.0.1".into(),
        port: 6901,
    }
}

fn tunnel() -> SshTunnelConfig {
    SshTunnelConfig {
        host: "10.0.0.6".into(),
        port: 22,
        user: "vcap".into(),
        password: String::new(),
        private_key: "/tmp/key".into(),
    }
}

/// Record `vm-1` as the current VM and return the instance found for it.
async fn existing_instance(h: &Harness) -> Instance {
    h.cloud.add_vm("vm-1");
    h.repos.vms.update_current("vm-1").await.unwrap();
    h.instance_manager().find_current().await.unwrap().remove(0)
}

#[tokio::test]
async fn test_find_current_is_unknown_job() {
    let h = Harness::new();
    assert!(h.instance_manager().find_current().await.unwrap().is_empty());

    let instance = existing_instance(&h).await;
    assert_eq!(instance.job_name(), "unknown");
    assert_eq!(instance.id(), 0);
    assert_eq!(instance.vm().cid(), "vm-1");
    assert_eq!(instance.state(), InstanceState::Running);
}

#[tokio::test]
async fn test_delete_missing_vm_is_skipped() {
    let h = Harness::new();
    let mut instance = existing_instance(&h).await;
    h.cloud.forget_vm("vm-1");
    let (reporter, stage) = stage();

    instance.delete(PING_TIMEOUT, PING_DELAY, false, &stage).await.unwrap();

    assert_eq!(
        reporter.outcomes(),
        vec![("Deleting VM 'vm-1'".to_string(), EventState::Skipped)]
    );
    assert!(h.agent.calls().is_empty());
    assert!(h.repos.vms.find_current().await.unwrap().is_none());
    assert_eq!(instance.state(), InstanceState::Deleted);
}

#[tokio::test(start_paused = true)]
async fn test_delete_with_unresponsive_agent_still_deletes_vm() {
    let h = Harness::new();
    let mut instance = existing_instance(&h).await;
    h.agent.fail_pings(u32::MAX);
    let (reporter, stage) = stage();

    instance.delete(PING_TIMEOUT, PING_DELAY, false, &stage).await.unwrap();

    assert_eq!(
        reporter.outcomes(),
        vec![
            ("Waiting for the agent on VM 'vm-1'".to_string(), EventState::Failed),
            ("Deleting VM 'vm-1'".to_string(), EventState::Finished),
        ]
    );
    assert_eq!(h.agent.calls_named("stop"), 0);
    assert!(!h.cloud.has_vm_now("vm-1"));
}

#[tokio::test]
async fn test_delete_stops_unmounts_then_deletes() {
    let h = Harness::new();
    let mut instance = existing_instance(&h).await;
    h.agent.mount_disk("disk-1").await.unwrap();
    let (reporter, stage) = stage();

    instance.delete(PING_TIMEOUT, PING_DELAY, false, &stage).await.unwrap();

    assert_eq!(
        reporter.step_names(),
        vec![
            "Waiting for the agent on VM 'vm-1'".to_string(),
            "Running the pre-stop scripts 'unknown/0'".to_string(),
            "Draining jobs on instance 'unknown/0'".to_string(),
            "Stopping jobs on instance 'unknown/0'".to_string(),
            "Running the post-stop scripts 'unknown/0'".to_string(),
            "Unmounting disk 'disk-1'".to_string(),
            "Deleting VM 'vm-1'".to_string(),
        ]
    );
    assert_eq!(
        h.agent.calls(),
        vec![
            "mount_disk",
            "ping",
            "run_script:pre-stop",
            "drain",
            "stop",
            "run_script:post-stop",
            "list_disk",
            "unmount_disk",
        ]
    );
    assert!(h.agent.mounted().is_empty());
    assert!(h.repos.vms.find_current().await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_with_skip_drain() {
    let h = Harness::new();
    let mut instance = existing_instance(&h).await;
    let (reporter, stage) = stage();

    instance.delete(PING_TIMEOUT, PING_DELAY, true, &stage).await.unwrap();

    assert_eq!(
        reporter.step_names(),
        vec![
            "Waiting for the agent on VM 'vm-1'".to_string(),
            "Running the pre-stop scripts 'unknown/0'".to_string(),
            "Stopping jobs on instance 'unknown/0'".to_string(),
            "Running the post-stop scripts 'unknown/0'".to_string(),
            "Deleting VM 'vm-1'".to_string(),
        ]
    );
    assert_eq!(h.agent.calls_named("drain"), 0);
}

#[tokio::test]
async fn test_failed_drain_stops_the_teardown() {
    let h = Harness::new();
    let mut instance = existing_instance(&h).await;
    h.agent.fail_next("drain", "drain script exited 1");
    let (reporter, stage) = stage();

    let err = instance.delete(PING_TIMEOUT, PING_DELAY, false, &stage).await.unwrap_err();

    assert!(err.to_string().contains("drain script exited 1"));
    assert_eq!(
        reporter.outcomes().last().unwrap(),
        &("Draining jobs on instance 'unknown/0'".to_string(), EventState::Failed)
    );
    assert_eq!(h.agent.calls_named("stop"), 0);
    assert!(h.cloud.has_vm_now("vm-1"));
}

#[tokio::test]
async fn test_delete_vm_failure_propagates() {
    let h = Harness::new();
    let mut instance = existing_instance(&h).await;
    h.cloud
        .fail_next("delete_vm", crate::error::CloudErrorKind::Other, "fake-delete-vm-error");
    let (reporter, stage) = stage();

    let err = instance.delete(PING_TIMEOUT, PING_DELAY, false, &stage).await.unwrap_err();
    assert!(err.to_string().contains("fake-delete-vm-error"));
    assert_eq!(
        reporter.outcomes().last().unwrap(),
        &("Deleting VM 'vm-1'".to_string(), EventState::Failed)
    );
    assert_eq!(h.repos.vms.find_current().await.unwrap().as_deref(), Some("vm-1"));
}

#[tokio::test(start_paused = true)]
async fn test_create_then_update_jobs() {
    let h = Harness::new();
    let stemcell = h.upload_stemcell("ubuntu", "1").await;
    let manifest = manifest();
    let (reporter, stage) = stage();

    let (mut instance, disks) = h
        .instance_manager()
        .create(
            "director",
            0,
            &manifest,
            &stemcell,
            &RegistryConfig::default(),
            &SshTunnelConfig::default(),
            &stage,
        )
        .await
        .unwrap();
    let vm_cid = instance.vm().cid().to_string();
    let disk_cid = disks[0].cid().to_string();

    assert_eq!(instance.state(), InstanceState::DisksUpdated);
    assert_eq!(
        reporter.step_names(),
        vec![
            format!("Creating VM for instance 'director/0' from stemcell '{}'", stemcell.cid()),
            format!("Waiting for the agent on VM '{}' to be ready", vm_cid),
            "Creating disk".to_string(),
            format!("Attaching disk '{}' to VM '{}'", disk_cid, vm_cid),
        ]
    );
    let current = h.repos.stemcells.find_current().await.unwrap().unwrap();
    assert_eq!(current.cid, stemcell.cid());
    assert_eq!(h.ssh.connect_attempts(), 0);

    reporter.clear();
    h.agent
        .set_networks(serde_json::json!({"private": {"ip": "10.0.0.6"}}));
    let before = h.agent.calls().len();
    instance.update_jobs(&manifest, &stage).await.unwrap();

    assert_eq!(instance.state(), InstanceState::Running);
    assert_eq!(
        reporter.step_names(),
        vec![
            "Updating instance 'director/0'".to_string(),
            "Waiting for instance 'director/0' to be running".to_string(),
            "Running the post-start scripts 'director/0'".to_string(),
        ]
    );
    assert_eq!(
        h.agent.calls()[before..],
        [
            "apply",
            "get_state",
            "stop",
            "apply",
            "run_script:pre-start",
            "start",
            "get_state",
            "run_script:post-start",
        ]
    );
    let applied = h.agent.applied();
    assert_eq!(applied[0]["initial"], true);
    assert_eq!(applied[1]["job"], "director");
    assert_eq!(applied[1]["networks"]["private"]["ip"], "10.0.0.6");
}

#[tokio::test(start_paused = true)]
async fn test_failed_pre_start_script_never_starts_jobs() {
    let h = Harness::new();
    let stemcell = h.upload_stemcell("ubuntu", "1").await;
    let manifest = manifest();
    let (reporter, stage) = stage();
    let (mut instance, _) = h
        .instance_manager()
        .create("director", 0, &manifest, &stemcell, &Default::default(), &Default::default(), &stage)
        .await
        .unwrap();
    h.agent.fail_next("run_script:pre-start", "pre-start exited 2");
    reporter.clear();

    let err = instance.update_jobs(&manifest, &stage).await.unwrap_err();

    assert!(err.to_string().contains("Running the pre-start script"));
    assert_eq!(
        reporter.outcomes(),
        vec![("Updating instance 'director/0'".to_string(), EventState::Failed)]
    );
    assert_eq!(h.agent.calls_named("start"), 0);
    assert_eq!(instance.state(), InstanceState::DisksUpdated);
}

#[tokio::test(start_paused = true)]
async fn test_update_jobs_fails_when_never_running() {
    let h = Harness::new();
    let stemcell = h.upload_stemcell("ubuntu", "1").await;
    let manifest = manifest();
    let (reporter, stage) = stage();
    let (mut instance, _) = h
        .instance_manager()
        .create("director", 0, &manifest, &stemcell, &Default::default(), &Default::default(), &stage)
        .await
        .unwrap();
    h.agent.set_job_states(&["failing"]);

    let err = instance.update_jobs(&manifest, &stage).await.unwrap_err();

    assert!(err.to_string().contains("Received non-running job state: 'failing'"));
    // one resolved-state read, then the 0..3000ms window polled every second
    assert_eq!(h.agent.calls_named("get_state"), 4);
    assert_eq!(h.agent.calls_named("run_script:post-start"), 0);
    assert_eq!(
        reporter.outcomes().last().unwrap(),
        &("Waiting for instance 'director/0' to be running".to_string(), EventState::Failed)
    );
    assert_eq!(instance.state(), InstanceState::DisksUpdated);
}

#[tokio::test(start_paused = true)]
async fn test_update_jobs_state_builder_failure_sends_only_initial_state() {
    let h = Harness::new();
    let stemcell = h.upload_stemcell("ubuntu", "1").await;
    let manifest = manifest();
    let (reporter, stage) = stage();
    let (mut instance, _) = h
        .instance_manager()
        .create("director", 0, &manifest, &stemcell, &Default::default(), &Default::default(), &stage)
        .await
        .unwrap();
    h.state_builder.fail_with("template 'ctl.erb' missing");
    reporter.clear();

    let err = instance.update_jobs(&manifest, &stage).await.unwrap_err();
    assert!(err.to_string().contains("Building state for instance 'director/0'"));
    assert!(reporter.events().is_empty());
    let applied = h.agent.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0]["initial"], true);
    assert_eq!(h.agent.calls_named("stop"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_until_ready_holds_tunnel_open() {
    let h = Harness::new();
    let stemcell = h.upload_stemcell("ubuntu", "1").await;
    let (_, stage) = stage();

    h.instance_manager()
        .create("director", 0, &manifest(), &stemcell, &registry(), &tunnel(), &stage)
        .await
        .unwrap();

    assert_eq!(h.ssh.connect_attempts(), 1);
    assert_eq!(h.ssh.forwards(), vec![(6901, 6901)]);
    assert_eq!(h.ssh.closed_sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tunnel_needs_both_registry_and_ssh_config() {
    let h = Harness::new();
    let stemcell = h.upload_stemcell("ubuntu", "1").await;
    let (_, stage) = stage();

    h.instance_manager()
        .create("director", 0, &manifest(), &stemcell, &registry(), &Default::default(), &stage)
        .await
        .unwrap();

    assert_eq!(h.ssh.connect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tunnel_stopped_when_agent_never_answers() {
    let h = Harness::new();
    let stemcell = h.upload_stemcell("ubuntu", "1").await;
    h.agent.fail_pings(u32::MAX);
    let (reporter, stage) = stage();

    let err = h
        .instance_manager()
        .create("director", 0, &manifest(), &stemcell, &registry(), &tunnel(), &stage)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Waiting until instance is ready"));
    assert_eq!(h.ssh.closed_sessions(), 1);
    assert_eq!(reporter.outcomes().last().unwrap().1, EventState::Failed);
    // the VM is recorded so the next run deletes it
    assert!(h.repos.vms.find_current().await.unwrap().is_some());
    assert_eq!(h.cloud.calls_named("create_disk"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_then_start() {
    let h = Harness::new();
    let stemcell = h.upload_stemcell("ubuntu", "1").await;
    let manifest = manifest();
    let (reporter, stage) = stage();
    let (mut instance, disks) = h
        .instance_manager()
        .create("director", 0, &manifest, &stemcell, &Default::default(), &Default::default(), &stage)
        .await
        .unwrap();
    let vm_cid = instance.vm().cid().to_string();

    reporter.clear();
    instance.stop(PING_TIMEOUT, PING_DELAY, false, &stage).await.unwrap();
    assert_eq!(
        reporter.step_names(),
        vec![
            format!("Waiting for the agent on VM '{}'", vm_cid),
            "Running the pre-stop scripts 'director/0'".to_string(),
            "Draining jobs on instance 'director/0'".to_string(),
            "Stopping jobs on instance 'director/0'".to_string(),
            "Running the post-stop scripts 'director/0'".to_string(),
        ]
    );
    assert_eq!(instance.state(), InstanceState::Stopped);
    // stop leaves the disk mounted
    assert_eq!(h.agent.mounted(), vec![disks[0].cid().to_string()]);

    reporter.clear();
    instance
        .start(&manifest.update, PING_TIMEOUT, PING_DELAY, &stage)
        .await
        .unwrap();
    assert_eq!(
        reporter.step_names(),
        vec![
            format!("Waiting for the agent on VM '{}'", vm_cid),
            "Running the pre-start scripts 'director/0'".to_string(),
            "Starting the agent 'director/0'".to_string(),
            "Waiting for instance 'director/0' to be running".to_string(),
            "Running the post-start scripts 'director/0'".to_string(),
        ]
    );
    assert_eq!(instance.state(), InstanceState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_start_with_unresponsive_agent_is_a_no_op() {
    let h = Harness::new();
    let mut instance = existing_instance(&h).await;
    h.agent.fail_pings(u32::MAX);
    let (reporter, stage) = stage();

    instance
        .start(&manifest().update, PING_TIMEOUT, PING_DELAY, &stage)
        .await
        .unwrap();

    assert_eq!(
        reporter.outcomes(),
        vec![("Waiting for the agent on VM 'vm-1'".to_string(), EventState::Failed)]
    );
    assert_eq!(h.agent.calls_named("start"), 0);
    assert_eq!(h.agent.calls_named("run_script:pre-start"), 0);
}

#[tokio::test]
async fn test_delete_all_without_instances_reports_nothing() {
    let h = Harness::new();
    let (reporter, stage) = stage();

    h.instance_manager()
        .delete_all(PING_TIMEOUT, PING_DELAY, false, &stage)
        .await
        .unwrap();
    assert!(reporter.events().is_empty());
}

#[tokio::test]
async fn test_instance_debug_names_job_and_vm() {
    let h = Harness::new();
    let instance = existing_instance(&h).await;

    let debug = format!("{:?}", instance);
    assert!(debug.contains("\"unknown\""), "{}", debug);
    assert!(debug.contains("vm-1"), "{}", debug);
    assert!(debug.contains("Running"), "{}", debug);
}

#[test]
fn test_watch_attempts() {
    let second = Duration::from_secs(1);
    assert_eq!(watch_attempts(Duration::ZERO, Duration::from_millis(3000), second), 3);
    assert_eq!(watch_attempts(Duration::from_millis(5000), Duration::from_millis(3000), second), 0);
    assert_eq!(watch_attempts(Duration::ZERO, Duration::from_millis(10), Duration::ZERO), 10);
    // windows longer than u32::MAX polls saturate instead of wrapping
    assert_eq!(
        watch_attempts(Duration::ZERO, Duration::from_millis(u64::MAX), Duration::from_millis(1)),
        u32::MAX
    );
}
