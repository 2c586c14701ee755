//! Result and connection types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit status code (0 for success)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandResult {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// stdout without surrounding whitespace or terminal line endings
    #[must_use]
    pub fn trimmed_stdout(&self) -> &str {
        self.stdout.trim()
    }

    /// Turn a non-zero exit into `ExecError::CommandFailed`
    ///
    /// # Errors
    /// Returns `ExecError::CommandFailed` when the exit status is not 0
    pub fn into_success(self) -> Result<Self, crate::ExecError> {
        if self.success() {
            Ok(self)
        } else {
            Err(crate::ExecError::CommandFailed {
                status: self.status,
                stderr: self.stderr,
            })
        }
    }
}

/// Where and as whom to open an SSH session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Host address
    pub host: String,
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username
    pub user: String,
}

fn default_port() -> u16 {
    22
}

impl ConnectionInfo {
    /// Create new connection info on the default port
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
        }
    }

    /// Parse `host` or `host:port`, falling back to `default_port`
    pub fn from_addr(addr: &str, user: impl Into<String>, default_port: u16) -> Self {
        let (host, port) = match addr.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse::<u16>() {
                Ok(port) => (host, port),
                Err(_) => (addr, default_port),
            },
            _ => (addr, default_port),
        };

        Self {
            host: host.to_string(),
            port,
            user: user.into(),
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_addr_without_port() {
        let info = ConnectionInfo::from_addr("192.168.0.2", "root", 22);
        assert_eq!(info.host, "192.168.0.2");
        assert_eq!(info.port, 22);
    }

    #[test]
    fn test_from_addr_with_port() {
        let info = ConnectionInfo::from_addr("192.168.0.2:2222", "root", 22);
        assert_eq!(info.host, "192.168.0.2");
        assert_eq!(info.port, 2222);
    }

    #[test]
    fn test_from_addr_ipv6_literal_is_left_alone() {
        let info = ConnectionInfo::from_addr("fe80::1", "root", 22);
        assert_eq!(info.host, "fe80::1");
        assert_eq!(info.port, 22);
    }

    #[test]
    fn test_into_success() {
        let failed = CommandResult {
            status: 2,
            stdout: String::new(),
            stderr: "no such file".to_string(),
            duration: Duration::from_millis(1),
        };
        assert!(failed.into_success().is_err());
    }
}
