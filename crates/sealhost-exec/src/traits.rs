//! Remote executor trait

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::CommandResult;

/// Command execution and file streaming against one host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command and collect its output
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError>;

    /// Run a shell command, failing with `ExecError::Timeout` when it takes too long
    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ExecError>;

    /// Open a content channel that writes (and truncates) `path` on the host
    async fn create_file(&self, path: &str) -> Result<Box<dyn FileSink>, ExecError>;

    /// Whether a session is currently established
    fn is_connected(&self) -> bool {
        true
    }

    /// Close the session; later calls may reconnect
    async fn disconnect(&self) -> Result<(), ExecError> {
        Ok(())
    }

    /// Short name of the transport, for logs
    fn executor_type(&self) -> &'static str;
}

/// Ordered byte sink for one remote file
///
/// Chunks are written in call order. `finish` flushes and closes the channel;
/// dropping a sink without finishing abandons the write.
#[async_trait]
pub trait FileSink: Send {
    /// Append a chunk
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), ExecError>;

    /// Flush, close and wait for the remote side to acknowledge
    async fn finish(self: Box<Self>) -> Result<(), ExecError>;
}

/// Quote a value for safe use as a single POSIX shell word
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("/root/kube.tar.gz"), "'/root/kube.tar.gz'");
    }

    #[test]
    fn test_shell_quote_embedded_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
