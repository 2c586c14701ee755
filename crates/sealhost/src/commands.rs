//! Subcommand handlers

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Result, WrapErr, bail, eyre};
use kameo::actor::{ActorRef, Spawn};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use sealhost_core::{
    ApplyInfra, ClusterActor, ClusterActorArgs, ClusterEvent, FileStatusStore, GetInfraStatus,
    InstallArtifact,
};
use sealhost_dist::{DistributionReport, DistributionRequest, Distributor, HttpArtifactResolver};
use sealhost_exec::SshSessionFactory;
use sealhost_infra::{InfraSpec, MemoryCloud};

use crate::config::Config;

fn load_spec(path: &Path) -> Result<InfraSpec> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read infra file {}", path.display()))?;
    toml::from_str(&content).wrap_err_with(|| format!("invalid infra file {}", path.display()))
}

fn distributor(config: &Config) -> Arc<Distributor> {
    let sessions = SshSessionFactory::new(&config.ssh.user, config.ssh.key_source())
        .with_port(config.ssh.port);
    Arc::new(Distributor::new(
        Arc::new(sessions),
        Arc::new(HttpArtifactResolver::new(config.state.cache_dir())),
        config.distribute.options(),
    ))
}

/// Where the in-memory provider keeps the resources of `name` between runs
fn cloud_path(config: &Config, name: &str) -> Result<PathBuf> {
    if name.starts_with('.') || Path::new(name).file_name() != Some(OsStr::new(name)) {
        bail!("invalid cluster name: {name:?}");
    }
    Ok(config.state.dir().join("memory-cloud").join(format!("{name}.json")))
}

async fn load_cloud(path: &Path) -> Result<MemoryCloud> {
    match tokio::fs::read(path).await {
        Ok(data) => {
            let snapshot = serde_json::from_slice(&data)
                .wrap_err_with(|| format!("corrupt provider state {}", path.display()))?;
            Ok(MemoryCloud::restore(snapshot))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MemoryCloud::new()),
        Err(e) => Err(e).wrap_err_with(|| format!("failed to read {}", path.display())),
    }
}

async fn save_cloud(path: &Path, cloud: &MemoryCloud) -> Result<()> {
    if cloud.is_empty().await {
        return match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).wrap_err_with(|| format!("failed to remove {}", path.display()))
            }
            _ => Ok(()),
        };
    }

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .wrap_err_with(|| format!("failed to create {}", dir.display()))?;
    }
    let data = serde_json::to_vec_pretty(&cloud.snapshot().await)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, data)
        .await
        .wrap_err_with(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .wrap_err_with(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Spawn the actor owning `name`, logging its events as they arrive
///
/// Only the in-memory provider ships; `cloud` carries its resources.
fn spawn_cluster(config: &Config, name: &str, cloud: MemoryCloud) -> ActorRef<ClusterActor> {
    let (event_tx, mut event_rx) = broadcast::channel::<ClusterEvent>(64);
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            debug!(event = ?event, "cluster event");
        }
    });

    ClusterActor::spawn(ClusterActorArgs {
        name: name.to_string(),
        connector: Arc::new(cloud),
        store: Arc::new(FileStatusStore::new(config.state.dir())),
        distributor: distributor(config),
        event_tx,
    })
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn check_report(report: &DistributionReport) -> Result<()> {
    for host in &report.hosts {
        if let Some(error) = &host.error {
            warn!(host = %host.host, error = %error, "host failed");
        }
    }
    if report.is_success() {
        Ok(())
    } else {
        bail!(
            "{} of {} hosts did not complete",
            report.hosts.iter().filter(|h| !h.is_success()).count(),
            report.hosts.len()
        )
    }
}

pub async fn apply(config: &Config, file: &Path, delete: bool) -> Result<()> {
    let mut spec = load_spec(file)?;
    if delete {
        spec.mark_for_deletion();
    }

    let cloud_path = cloud_path(config, &spec.name)?;
    let cloud = load_cloud(&cloud_path).await?;
    let actor = spawn_cluster(config, &spec.name, cloud.clone());
    let result = actor.ask(ApplyInfra { spec }).await;
    let _ = actor.stop_gracefully().await;

    save_cloud(&cloud_path, &cloud).await?;
    let report = result.map_err(|e| eyre!("apply failed: {e}"))?;

    print_json(&report)?;
    if !report.is_success() {
        for error in &report.errors {
            warn!(error = %error, "step failed");
        }
        bail!("apply finished with {} errors, run it again to retry", report.errors.len());
    }

    info!(phase = %report.phase, "apply finished");
    Ok(())
}

pub async fn status(config: &Config, file: &Path) -> Result<()> {
    let spec = load_spec(file)?;
    let cloud = load_cloud(&cloud_path(config, &spec.name)?).await?;
    let actor = spawn_cluster(config, &spec.name, cloud);
    let snapshot = actor
        .ask(GetInfraStatus)
        .await
        .map_err(|e| eyre!("status query failed: {e}"))?;
    let _ = actor.stop_gracefully().await;

    print_json(&snapshot)
}

pub async fn copy(config: &Config, request: &DistributionRequest) -> Result<()> {
    let report = distributor(config).distribute(request).await?;
    print_json(&report)?;
    check_report(&report)
}

pub async fn install(config: &Config, file: &Path, msg: InstallArtifact) -> Result<()> {
    let spec = load_spec(file)?;
    let cloud = load_cloud(&cloud_path(config, &spec.name)?).await?;
    let actor = spawn_cluster(config, &spec.name, cloud);
    let report = actor
        .ask(msg)
        .await
        .map_err(|e| eyre!("install failed: {e}"))?;
    let _ = actor.stop_gracefully().await;

    print_json(&report)?;
    check_report(&report)
}

#[cfg(test)]
mod tests {
    use sealhost_core::{ClusterPhase, StatusStore};

    use super::*;

    const INFRA: &str = r#"
name = "demo"

[credential]
access_key = "ak"
access_secret = "sk"

[cluster]
region_ids = ["cn-hangzhou"]

[[hosts]]
roles = ["master"]
count = 1
instance_type = "ecs.c7.large"
image_id = "centos_7"
"#;

    fn workspace() -> (tempfile::TempDir, Config, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.state.dir = dir.path().join("state").to_str().unwrap().to_string();
        let infra = dir.path().join("infra.toml");
        std::fs::write(&infra, INFRA).unwrap();
        (dir, config, infra)
    }

    #[test]
    fn test_load_spec() {
        let (_dir, _config, infra) = workspace();

        let spec = load_spec(&infra).unwrap();
        assert_eq!(spec.name, "demo");
        assert_eq!(spec.hosts.len(), 1);
        assert!(!spec.is_deleting());
    }

    #[test]
    fn test_load_spec_reports_path() {
        let err = load_spec(Path::new("/nonexistent/infra.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/infra.toml"));
    }

    #[test]
    fn test_cloud_path_rejects_path_like_names() {
        let config = Config::default();
        assert!(cloud_path(&config, "demo").is_ok());
        assert!(cloud_path(&config, "../demo").is_err());
        assert!(cloud_path(&config, ".hidden").is_err());
        assert!(cloud_path(&config, "").is_err());
    }

    #[tokio::test]
    async fn test_status_of_unknown_cluster_is_empty() {
        let (_dir, config, _infra) = workspace();

        let actor = spawn_cluster(&config, "fresh", MemoryCloud::new());
        let snapshot = actor.ask(GetInfraStatus).await.unwrap();
        assert_eq!(snapshot.phase, ClusterPhase::Empty);
        assert!(snapshot.status.hosts.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_apply_converges_across_runs() {
        let (_dir, config, infra) = workspace();
        let store = FileStatusStore::new(config.state.dir());
        let cloud_file = cloud_path(&config, "demo").unwrap();

        apply(&config, &infra, false).await.unwrap();
        let first = store.load("demo").await.unwrap().unwrap();
        assert!(cloud_file.exists());

        apply(&config, &infra, false).await.unwrap();
        let second = store.load("demo").await.unwrap().unwrap();
        assert_eq!(first, second);
        assert!(second.hosts[0].ready);

        let cloud = load_cloud(&cloud_file).await.unwrap();
        assert_eq!(cloud.instance_count().await, 1);

        apply(&config, &infra, true).await.unwrap();
        assert!(store.load("demo").await.unwrap().is_none());
        assert!(!cloud_file.exists());
    }
}
