//! Per-host session factory

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ExecError;
use crate::keys::KeySource;
use crate::local::LocalExecutor;
use crate::result::ConnectionInfo;
use crate::ssh::SshExecutor;
use crate::traits::RemoteExecutor;

/// Opens an authenticated session to a host
///
/// Each call yields a fresh session; callers reuse it for all work on that
/// host and never share it with another host.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a session to `host` (`addr` or `addr:port`)
    async fn open(&self, host: &str) -> Result<Arc<dyn RemoteExecutor>, ExecError>;
}

/// SSH sessions sharing one set of credentials
#[derive(Debug, Clone)]
pub struct SshSessionFactory {
    user: String,
    port: u16,
    key_source: KeySource,
}

impl SshSessionFactory {
    /// Create a factory for `user` authenticating with `key_source`
    pub fn new(user: impl Into<String>, key_source: KeySource) -> Self {
        Self {
            user: user.into(),
            port: 22,
            key_source,
        }
    }

    /// Default port for hosts given without one
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn is_local(host: &str) -> bool {
        host == "localhost" || host == "127.0.0.1"
    }
}

#[async_trait]
impl SessionFactory for SshSessionFactory {
    async fn open(&self, host: &str) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        if Self::is_local(host) {
            debug!(host = %host, "using local executor");
            return Ok(Arc::new(LocalExecutor::new()));
        }

        let conn_info = ConnectionInfo::from_addr(host, &self.user, self.port);
        let executor = SshExecutor::new(conn_info, &self.key_source)?;
        executor.connect().await?;

        Ok(Arc::new(executor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_localhost_uses_local_executor() {
        let factory = SshSessionFactory::new("root", KeySource::Password("pw".into()));
        let session = factory.open("127.0.0.1").await.unwrap();
        assert_eq!(session.executor_type(), "local");
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_to_open() {
        let factory =
            SshSessionFactory::new("root", KeySource::Password("pw".into())).with_port(1);
        // port 1 on loopback alias: nothing listens there
        let result = factory.open("127.0.0.2").await;
        assert!(matches!(result, Err(ExecError::ConnectionFailed(_))));
    }
}
