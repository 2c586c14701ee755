use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kameo::actor::Spawn;
use tokio::sync::broadcast;

use sealhost_core::*;
use sealhost_dist::{DistributeOptions, Distributor, HttpArtifactResolver, bytes_fingerprint};
use sealhost_exec::{CommandResult, ExecError, FileSink, RemoteExecutor, SessionFactory};
use sealhost_infra::{
    ClusterSpec, Credential, HostGroupSpec, InfraSpec, MemoryCloud, NetworkSpec, Operation,
};

// Mock implementations

/// Every host reachable, each with its own in-memory filesystem
#[derive(Default)]
struct MockFleet {
    files: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
}

impl MockFleet {
    fn hosts_with(&self, path: &str) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|(_, p)| p == path)
            .map(|(h, _)| h.clone())
            .collect();
        hosts.sort();
        hosts
    }
}

#[async_trait]
impl SessionFactory for MockFleet {
    async fn open(&self, host: &str) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        Ok(Arc::new(MockHost {
            host: host.to_string(),
            files: Arc::clone(&self.files),
        }))
    }
}

struct MockHost {
    host: String,
    files: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
}

fn reply(status: i32, stdout: String) -> CommandResult {
    CommandResult {
        status,
        stdout,
        stderr: String::new(),
        duration: Duration::from_millis(1),
    }
}

#[async_trait]
impl RemoteExecutor for MockHost {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        let path = cmd.split('\'').nth(1).unwrap_or_default().to_string();
        let key = (self.host.clone(), path);
        let files = self.files.lock().unwrap();
        let result = match cmd.split_whitespace().next().unwrap_or_default() {
            "test" => reply(i32::from(!files.contains_key(&key)), String::new()),
            "sha256sum" => match files.get(&key) {
                Some(content) => reply(0, format!("{}\n", bytes_fingerprint(content))),
                None => reply(1, String::new()),
            },
            _ => reply(0, String::new()),
        };
        Ok(result)
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        _timeout: Duration,
    ) -> Result<CommandResult, ExecError> {
        self.run(cmd).await
    }

    async fn create_file(&self, path: &str) -> Result<Box<dyn FileSink>, ExecError> {
        Ok(Box::new(MockSink {
            key: (self.host.clone(), path.to_string()),
            files: Arc::clone(&self.files),
            buffer: Vec::new(),
        }))
    }

    fn executor_type(&self) -> &'static str {
        "mock"
    }
}

struct MockSink {
    key: (String, String),
    files: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
    buffer: Vec<u8>,
}

#[async_trait]
impl FileSink for MockSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), ExecError> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), ExecError> {
        let MockSink { key, files, buffer } = *self;
        files.lock().unwrap().insert(key, buffer);
        Ok(())
    }
}

// Fixtures

fn group(roles: &[&str], count: u32) -> HostGroupSpec {
    HostGroupSpec {
        roles: roles.iter().map(|r| (*r).to_string()).collect(),
        count,
        instance_type: "ecs.c7.large".to_string(),
        image_id: "centos_7".to_string(),
        system_disk_gb: 100,
        data_disks_gb: vec![],
    }
}

fn spec(name: &str) -> InfraSpec {
    InfraSpec {
        name: name.to_string(),
        deletion_timestamp: None,
        credential: Credential {
            access_key: "ak".to_string(),
            access_secret: "sk".to_string(),
        },
        cluster: ClusterSpec {
            region_ids: vec!["cn-hangzhou".to_string()],
            network: NetworkSpec::default(),
            is_seize: false,
            ingress: vec![],
        },
        hosts: vec![group(&["master"], 1), group(&["node"], 2)],
    }
}

struct Harness {
    cloud: Arc<MemoryCloud>,
    fleet: Arc<MockFleet>,
    store: Arc<FileStatusStore>,
    distributor: Arc<Distributor>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fleet = Arc::new(MockFleet::default());
        let distributor = Arc::new(Distributor::new(
            Arc::clone(&fleet) as Arc<dyn SessionFactory>,
            Arc::new(HttpArtifactResolver::new(dir.path().join("cache"))),
            DistributeOptions::default(),
        ));
        Self {
            cloud: Arc::new(MemoryCloud::new()),
            fleet,
            store: Arc::new(FileStatusStore::new(dir.path().join("clusters"))),
            distributor,
            dir,
        }
    }

    fn args(&self, name: &str, event_tx: broadcast::Sender<ClusterEvent>) -> ClusterActorArgs {
        ClusterActorArgs {
            name: name.to_string(),
            connector: Arc::clone(&self.cloud) as Arc<dyn sealhost_infra::CloudConnector>,
            store: Arc::clone(&self.store) as Arc<dyn StatusStore>,
            distributor: Arc::clone(&self.distributor),
            event_tx,
        }
    }

    fn artifact(&self, content: &[u8]) -> String {
        let path = self.dir.path().join("kube.tar.gz");
        std::fs::write(&path, content).unwrap();
        path.to_str().unwrap().to_string()
    }
}

// Tests

#[tokio::test]
async fn test_apply_persists_and_survives_restart() {
    let harness = Harness::new();
    let (event_tx, mut event_rx) = broadcast::channel(16);

    let actor = ClusterActor::spawn(harness.args("demo", event_tx.clone()));
    let report = actor.ask(ApplyInfra { spec: spec("demo") }).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.phase, ClusterPhase::Ready);
    assert_eq!(report.status.hosts.len(), 2);
    assert_eq!(harness.cloud.instance_count().await, 3);

    let stored = harness.store.load("demo").await.unwrap().unwrap();
    assert_eq!(stored, report.status);

    let first = event_rx.recv().await.unwrap();
    assert_eq!(
        first,
        ClusterEvent::PhaseChanged {
            cluster: "demo".to_string(),
            from: "empty".to_string(),
            to: "provisioning".to_string(),
        }
    );

    actor.stop_gracefully().await.unwrap();

    let restarted = ClusterActor::spawn(harness.args("demo", event_tx));
    let snapshot = restarted.ask(GetInfraStatus).await.unwrap();
    assert_eq!(snapshot.name, "demo");
    assert_eq!(snapshot.phase, ClusterPhase::Ready);
    assert_eq!(snapshot.status, report.status);

    restarted.stop_gracefully().await.unwrap();
}

#[tokio::test]
async fn test_second_apply_creates_nothing() {
    let harness = Harness::new();
    let (event_tx, _rx) = broadcast::channel(16);
    let actor = ClusterActor::spawn(harness.args("demo", event_tx));

    actor.ask(ApplyInfra { spec: spec("demo") }).await.unwrap();
    harness.cloud.reset_calls().await;

    let report = actor.ask(ApplyInfra { spec: spec("demo") }).await.unwrap();
    assert!(report.is_success());
    assert!(
        !harness
            .cloud
            .calls()
            .await
            .iter()
            .any(|op| op.is_create())
    );

    actor.stop_gracefully().await.unwrap();
}

#[tokio::test]
async fn test_step_failures_are_reported_not_returned() {
    let harness = Harness::new();
    harness.cloud.fail_on(Operation::AllocateFloatingIp).await;
    let (event_tx, mut event_rx) = broadcast::channel(16);
    let actor = ClusterActor::spawn(harness.args("demo", event_tx));

    let report = actor.ask(ApplyInfra { spec: spec("demo") }).await.unwrap();

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("BindFloatingIP"));
    assert_eq!(report.phase, ClusterPhase::Provisioning);
    assert!(report.status.cluster.floating_ip_id.is_empty());
    assert!(harness.store.load("demo").await.unwrap().is_some());

    let finished = loop {
        if let ClusterEvent::ApplyFinished { errors, .. } = event_rx.recv().await.unwrap() {
            break errors;
        }
    };
    assert_eq!(finished, report.errors);

    harness.cloud.clear_failures().await;
    let report = actor.ask(ApplyInfra { spec: spec("demo") }).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.phase, ClusterPhase::Ready);

    actor.stop_gracefully().await.unwrap();
}

#[tokio::test]
async fn test_delete_removes_stored_status() {
    let harness = Harness::new();
    let (event_tx, _rx) = broadcast::channel(16);
    let actor = ClusterActor::spawn(harness.args("demo", event_tx));

    actor.ask(ApplyInfra { spec: spec("demo") }).await.unwrap();

    let mut doomed = spec("demo");
    doomed.mark_for_deletion();
    let report = actor.ask(ApplyInfra { spec: doomed }).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.phase, ClusterPhase::Deleted);
    assert!(report.status.hosts.is_empty());
    assert!(report.status.cluster.floating_ip.is_empty());
    assert!(harness.cloud.is_empty().await);
    assert!(harness.store.load("demo").await.unwrap().is_none());

    actor.stop_gracefully().await.unwrap();
}

#[tokio::test]
async fn test_rejects_spec_for_other_cluster() {
    let harness = Harness::new();
    let (event_tx, _rx) = broadcast::channel(16);
    let actor = ClusterActor::spawn(harness.args("demo", event_tx));

    let result = actor.ask(ApplyInfra { spec: spec("other") }).await;
    assert!(result.is_err());
    assert_eq!(harness.cloud.calls().await.len(), 0);

    actor.stop_gracefully().await.unwrap();
}

#[tokio::test]
async fn test_install_requires_ready_hosts() {
    let harness = Harness::new();
    let (event_tx, _rx) = broadcast::channel(16);
    let actor = ClusterActor::spawn(harness.args("demo", event_tx));

    let result = actor
        .ask(InstallArtifact {
            source: harness.artifact(b"payload"),
            dest_dir: "/root".to_string(),
            ..InstallArtifact::default()
        })
        .await;
    assert!(result.is_err());
    assert!(harness.fleet.hosts_with("/root/kube.tar.gz").is_empty());

    actor.stop_gracefully().await.unwrap();
}

#[tokio::test]
async fn test_install_reaches_ready_hosts_by_role() {
    let harness = Harness::new();
    let (event_tx, mut event_rx) = broadcast::channel(16);
    let actor = ClusterActor::spawn(harness.args("demo", event_tx));

    let applied = actor.ask(ApplyInfra { spec: spec("demo") }).await.unwrap();
    let node_index = applied.status.find_group("node").unwrap();
    let mut node_ips = applied.status.hosts[node_index].ips.clone();
    node_ips.sort();

    let report = actor
        .ask(InstallArtifact {
            source: harness.artifact(b"kubernetes binaries"),
            dest_dir: "/root".to_string(),
            role: Some("node".to_string()),
            ..InstallArtifact::default()
        })
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.hosts.len(), 2);
    assert_eq!(harness.fleet.hosts_with("/root/kube.tar.gz"), node_ips);

    let installed = loop {
        if let ClusterEvent::InstallFinished { hosts, failed, .. } = event_rx.recv().await.unwrap()
        {
            break (hosts, failed);
        }
    };
    assert_eq!(installed, (2, vec![]));

    actor.stop_gracefully().await.unwrap();
}
