//! Concurrent, verified file distribution
//!
//! One task per host. Each task opens its own session, runs the plan and
//! always disconnects before reporting. The call returns once every host has
//! finished.

use std::collections::HashMap;
use std::sync::Arc;

use sealhost_exec::{ExecError, RemoteExecutor, SessionFactory, shell_quote};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DistError;
use crate::fingerprint::remote_fingerprint;
use crate::job::{PlanEntry, TransferJob, TransferPlan};
use crate::progress::{Progress, human_size};
use crate::report::{DistributionReport, FileOutcome, FileReport, HostReport};
use crate::source::{ArtifactResolver, TransferSource};

/// Default chunk size for streaming file content
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// What a failed post-transfer verification does to the whole call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Record it in the report and log an error
    #[default]
    Warn,
    /// Also fail the call with `DistError::IntegrityMismatch`
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributeOptions {
    /// Cap on hosts handled at once; `None` means one task per host, all at once
    pub max_concurrency: Option<usize>,
    pub chunk_size: usize,
    pub mismatch_policy: MismatchPolicy,
}

impl Default for DistributeOptions {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            mismatch_policy: MismatchPolicy::Warn,
        }
    }
}

/// Push an artifact to a set of hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRequest {
    /// Local path or `http(s)` URL
    pub source: String,
    pub hosts: Vec<String>,
    /// Remote directory the artifact is placed in
    pub dest_dir: String,
    /// Shell command run before the transfer
    pub before: Option<String>,
    /// Shell command run after the transfer
    pub after: Option<String>,
}

pub struct Distributor {
    sessions: Arc<dyn SessionFactory>,
    resolver: Arc<dyn ArtifactResolver>,
    options: DistributeOptions,
}

impl Distributor {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        resolver: Arc<dyn ArtifactResolver>,
        options: DistributeOptions,
    ) -> Self {
        Self {
            sessions,
            resolver,
            options,
        }
    }

    /// Ensure `request.source` exists with verified content on every host
    ///
    /// Per-host failures are recorded in the report and never affect
    /// other hosts.
    ///
    /// # Errors
    /// Fails before any host is contacted when the source cannot be resolved,
    /// and after all hosts finished when the mismatch policy is `Fail` and a
    /// host ended with an unverified file
    #[instrument(skip_all, fields(source = %request.source, hosts = request.hosts.len()))]
    pub async fn distribute(
        &self,
        request: &DistributionRequest,
    ) -> Result<DistributionReport, DistError> {
        let artifact = self.resolver.resolve(&request.source).await?;
        let plan = TransferPlan::for_artifact(&artifact, &request.dest_dir).await?;
        info!(
            path = %artifact.path.display(),
            fingerprint = artifact.fingerprint.as_deref().unwrap_or("-"),
            files = plan.file_count(),
            "distributing artifact"
        );

        self.run_plan(plan, &request.hosts, request.before.clone(), request.after.clone())
            .await
    }

    /// Write an in-memory buffer to `remote_path` on every host, verified
    ///
    /// # Errors
    /// Same as [`Distributor::distribute`]
    pub async fn push_bytes(
        &self,
        data: impl Into<Arc<[u8]>>,
        hosts: &[String],
        remote_path: &str,
    ) -> Result<DistributionReport, DistError> {
        let plan = TransferPlan::for_bytes(data.into(), remote_path)?;
        self.run_plan(plan, hosts, None, None).await
    }

    async fn run_plan(
        &self,
        plan: TransferPlan,
        hosts: &[String],
        before: Option<String>,
        after: Option<String>,
    ) -> Result<DistributionReport, DistError> {
        let plan = Arc::new(plan);
        let limit = self.options.max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));
        let mut set = JoinSet::new();
        let mut order = HashMap::new();

        for (index, host) in hosts.iter().enumerate() {
            let job = TransferJob {
                host: host.clone(),
                plan: Arc::clone(&plan),
                before: before.clone(),
                after: after.clone(),
            };
            let sessions = Arc::clone(&self.sessions);
            let limit = limit.clone();
            let chunk_size = self.options.chunk_size.max(1);

            let handle = set.spawn(async move {
                let _permit = match limit {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                run_host(sessions.as_ref(), &job, chunk_size).await
            });
            order.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<HostReport>> = vec![None; hosts.len()];
        while let Some(joined) = set.join_next_with_id().await {
            let (id, report) = match joined {
                Ok((id, report)) => (id, report),
                Err(e) => {
                    let id = e.id();
                    let host = order.get(&id).map_or("", |i| hosts[*i].as_str());
                    error!(host = %host, error = %e, "host task aborted");
                    (id, HostReport::failed(host, format!("task aborted: {e}")))
                }
            };
            if let Some(index) = order.get(&id) {
                slots[*index] = Some(report);
            }
        }

        let report = DistributionReport {
            hosts: slots.into_iter().flatten().collect(),
        };

        let failed = report.failed_hosts();
        if !failed.is_empty() {
            warn!(hosts = ?failed, "distribution failed on some hosts");
        }

        let mismatched: Vec<String> = report
            .mismatched_hosts()
            .into_iter()
            .map(str::to_string)
            .collect();
        if !mismatched.is_empty() && self.options.mismatch_policy == MismatchPolicy::Fail {
            return Err(DistError::IntegrityMismatch { hosts: mismatched });
        }

        info!(bytes = %human_size(report.bytes_sent()), "distribution finished");
        Ok(report)
    }
}

async fn run_host(sessions: &dyn SessionFactory, job: &TransferJob, chunk_size: usize) -> HostReport {
    let session = match sessions.open(&job.host).await {
        Ok(session) => session,
        Err(e) => {
            error!(host = %job.host, error = %e, "failed to open session");
            return HostReport::failed(&job.host, e);
        }
    };

    let mut report = HostReport::new(&job.host);
    if let Err(e) = sync_host(session.as_ref(), job, chunk_size, &mut report).await {
        error!(host = %job.host, error = %e, "host unit aborted");
        report.error = Some(e.to_string());
    }

    if let Err(e) = session.disconnect().await {
        warn!(host = %job.host, error = %e, "failed to disconnect");
    }
    report
}

#[instrument(skip_all, fields(host = %job.host))]
async fn sync_host(
    session: &dyn RemoteExecutor,
    job: &TransferJob,
    chunk_size: usize,
    report: &mut HostReport,
) -> Result<(), DistError> {
    mkdir(session, &job.plan.dest_dir).await?;

    if let Some(before) = &job.before {
        debug!("running before hook");
        run_hook(session, "before", before).await?;
    }

    for entry in &job.plan.entries {
        match entry {
            PlanEntry::Dir { remote } => mkdir(session, remote).await?,
            PlanEntry::File {
                source,
                remote,
                fingerprint,
            } => {
                let outcome =
                    sync_file(session, &job.host, source, remote, fingerprint, chunk_size).await?;
                report.files.push(FileReport {
                    remote_path: remote.clone(),
                    outcome,
                });
            }
        }
    }

    if let Some(after) = &job.after {
        debug!("running after hook");
        run_hook(session, "after", after).await?;
    }
    Ok(())
}

async fn sync_file(
    session: &dyn RemoteExecutor,
    host: &str,
    source: &TransferSource,
    remote: &str,
    expected: &str,
    chunk_size: usize,
) -> Result<FileOutcome, DistError> {
    if file_exists(session, remote).await? {
        if remote_fingerprint(session, remote).await.ok().as_deref() == Some(expected) {
            info!(host = %host, path = %remote, "file exists and fingerprint matches");
            return Ok(FileOutcome::AlreadyCurrent);
        }
        debug!(host = %host, path = %remote, "stale remote file, replacing");
        session
            .run(&format!("rm -f {}", shell_quote(remote)))
            .await?
            .into_success()?;
    }

    let bytes = transfer(session, host, source, remote, chunk_size).await?;

    let actual = remote_fingerprint(session, remote).await?;
    if actual == expected {
        info!(host = %host, path = %remote, "copy file fingerprint validate success");
        Ok(FileOutcome::Transferred { bytes })
    } else {
        error!(host = %host, path = %remote, expected = %expected, actual = %actual, "copy file fingerprint validate failed");
        Ok(FileOutcome::Mismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

async fn transfer(
    session: &dyn RemoteExecutor,
    host: &str,
    source: &TransferSource,
    remote: &str,
    chunk_size: usize,
) -> Result<u64, DistError> {
    let mut sink = session.create_file(remote).await?;
    let mut progress = Progress::new(host, remote);

    match source {
        TransferSource::File(path) => {
            let mut file = File::open(path).await.map_err(|e| DistError::io(path.as_path(), &e))?;
            let mut buf = vec![0u8; chunk_size];
            loop {
                let n = file.read(&mut buf).await.map_err(|e| DistError::io(path.as_path(), &e))?;
                if n == 0 {
                    break;
                }
                sink.write_chunk(&buf[..n]).await?;
                progress.record(n);
            }
        }
        TransferSource::Bytes(data) => {
            for chunk in data.chunks(chunk_size) {
                sink.write_chunk(chunk).await?;
                progress.record(chunk.len());
            }
        }
    }

    sink.finish().await?;
    info!(host = %host, path = %remote, total = %human_size(progress.total()), "transfer complete");
    Ok(progress.total())
}

async fn file_exists(session: &dyn RemoteExecutor, path: &str) -> Result<bool, ExecError> {
    let result = session.run(&format!("test -f {}", shell_quote(path))).await?;
    Ok(result.success())
}

async fn mkdir(session: &dyn RemoteExecutor, dir: &str) -> Result<(), ExecError> {
    // exit status ignored; only session errors abort the host
    session
        .run(&format!("mkdir -p {} || true", shell_quote(dir)))
        .await?;
    Ok(())
}

async fn run_hook(session: &dyn RemoteExecutor, name: &str, cmd: &str) -> Result<(), ExecError> {
    let result = session.run(cmd).await?;
    if !result.success() {
        warn!(hook = name, status = result.status, stderr = %result.stderr.trim(), "hook exited non-zero");
    }
    Ok(())
}
