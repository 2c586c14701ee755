//! Local command execution using `tokio::process`

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::{FileSink, RemoteExecutor};

/// Local command executor
///
/// Treats the local machine as a target host. Used when a target address is
/// `localhost`/`127.0.0.1`.
#[derive(Debug, Clone)]
pub struct LocalExecutor;

impl LocalExecutor {
    /// Create a new local executor
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self), level = "debug")]
    async fn execute(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        debug!(command = %cmd, "executing local command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::SpawnError(e.to_string()))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let duration = start.elapsed();

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(
            command = %cmd,
            status = status,
            duration = ?duration,
            "command completed"
        );

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.execute(cmd).await
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout_duration: Duration,
    ) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        match timeout(timeout_duration, self.execute(cmd)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    command = %cmd,
                    timeout = ?timeout_duration,
                    elapsed = ?start.elapsed(),
                    "command timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn create_file(&self, path: &str) -> Result<Box<dyn FileSink>, ExecError> {
        let file = File::create(path)
            .await
            .map_err(|e| ExecError::TransferFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(LocalFileSink {
            file,
            path: path.to_string(),
        }))
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}

struct LocalFileSink {
    file: File,
    path: String,
}

impl LocalFileSink {
    fn transfer_error(&self, e: &std::io::Error) -> ExecError {
        ExecError::TransferFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl FileSink for LocalFileSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), ExecError> {
        if let Err(e) = self.file.write_all(chunk).await {
            return Err(self.transfer_error(&e));
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<(), ExecError> {
        if let Err(e) = self.file.flush().await {
            return Err(self.transfer_error(&e));
        }
        if let Err(e) = self.file.sync_all().await {
            return Err(self.transfer_error(&e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_success() {
        let executor = LocalExecutor::new();
        let result = executor.run("echo hello").await.unwrap();

        assert!(result.success());
        assert_eq!(result.trimmed_stdout(), "hello");
    }

    #[tokio::test]
    async fn test_run_failure() {
        let executor = LocalExecutor::new();
        let result = executor.run("exit 42").await.unwrap();

        assert!(!result.success());
        assert_eq!(result.status, 42);
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let executor = LocalExecutor::new();
        let result = executor
            .run_with_timeout("sleep 5", Duration::from_millis(100))
            .await;

        assert!(matches!(result, Err(ExecError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_create_file_writes_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        let path_str = path.to_str().unwrap();

        let executor = LocalExecutor::new();
        let mut sink = executor.create_file(path_str).await.unwrap();
        sink.write_chunk(b"hello ").await.unwrap();
        sink.write_chunk(b"world").await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_create_file_truncates_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, b"a much longer stale body").unwrap();

        let executor = LocalExecutor::new();
        let mut sink = executor.create_file(path.to_str().unwrap()).await.unwrap();
        sink.write_chunk(b"fresh").await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_create_file_in_missing_dir_fails() {
        let executor = LocalExecutor::new();
        let result = executor.create_file("/nonexistent-sealhost-dir/x").await;
        assert!(matches!(result, Err(ExecError::TransferFailed { .. })));
    }
}
