//! Configuration loading and types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sealhost_dist::{DEFAULT_CHUNK_SIZE, DistributeOptions, MismatchPolicy};
use sealhost_exec::KeySource;

/// Top-level configuration for the sealhost tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub distribute: DistributeConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit one JSON object per line
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Credentials shared by every host session
#[derive(Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Takes precedence over key authentication
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_private_key")]
    pub private_key: String,
    #[serde(default)]
    pub key_passphrase: Option<String>,
    /// Environment variable holding a base64-encoded private key
    #[serde(default)]
    pub key_env: Option<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            port: default_port(),
            password: None,
            private_key: default_private_key(),
            key_passphrase: None,
            key_env: None,
        }
    }
}

impl std::fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfig")
            .field("user", &self.user)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key)
            .field("key_env", &self.key_env)
            .finish_non_exhaustive()
    }
}

impl SshConfig {
    /// How sessions authenticate: password, then key from env, then key file
    #[must_use]
    pub fn key_source(&self) -> KeySource {
        if let Some(password) = &self.password {
            return KeySource::Password(password.clone());
        }
        if let Some(var) = &self.key_env {
            return KeySource::Env(var.clone());
        }
        KeySource::Path {
            path: expand_home(&self.private_key),
            passphrase: self.key_passphrase.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributeConfig {
    /// Hosts handled at once; unset means all of them
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub mismatch_policy: MismatchPolicy,
}

impl Default for DistributeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            mismatch_policy: MismatchPolicy::default(),
        }
    }
}

impl DistributeConfig {
    #[must_use]
    pub fn options(&self) -> DistributeOptions {
        DistributeOptions {
            max_concurrency: self.max_concurrency,
            chunk_size: self.chunk_size.max(1),
            mismatch_policy: self.mismatch_policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding one status document per cluster
    #[serde(default = "default_state_dir")]
    pub dir: String,
    /// Where downloaded artifacts are kept
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl StateConfig {
    #[must_use]
    pub fn dir(&self) -> PathBuf {
        expand_home(&self.dir)
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        expand_home(&self.cache_dir)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_private_key() -> String {
    "~/.ssh/id_rsa".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_state_dir() -> String {
    "~/.sealhost/clusters".to_string()
}

fn default_cache_dir() -> String {
    "~/.sealhost/cache".to_string()
}

/// Replace a leading `~` with the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("failed to read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("failed to parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Load from default paths or use defaults
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be loaded
    pub fn load_default() -> eyre::Result<Self> {
        if let Ok(path) = std::env::var("SEALHOST_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let mut paths = vec![
            PathBuf::from("sealhost.toml"),
            PathBuf::from("/etc/sealhost/sealhost.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("sealhost/sealhost.toml"));
        }

        for path in paths {
            if path.exists() {
                return Self::load(&path);
            }
        }

        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.log.level, "info");
        assert!(!config.log.json);
        assert_eq!(config.ssh.user, "root");
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.distribute.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.distribute.mismatch_policy, MismatchPolicy::Warn);
        assert!(config.state.dir.ends_with(".sealhost/clusters"));
    }

    #[test]
    fn test_load_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealhost.toml");
        std::fs::write(
            &path,
            r#"
[log]
level = "debug"
json = true

[ssh]
user = "deploy"
port = 2222
private_key = "/keys/id_ed25519"
key_passphrase = "secret"

[distribute]
max_concurrency = 8
chunk_size = 1024
mismatch_policy = "fail"

[state]
dir = "/var/lib/sealhost"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.log.level, "debug");
        assert!(config.log.json);
        assert_eq!(config.ssh.port, 2222);

        let options = config.distribute.options();
        assert_eq!(options.max_concurrency, Some(8));
        assert_eq!(options.chunk_size, 1024);
        assert_eq!(options.mismatch_policy, MismatchPolicy::Fail);

        assert_eq!(config.state.dir(), PathBuf::from("/var/lib/sealhost"));

        match config.ssh.key_source() {
            KeySource::Path { path, passphrase } => {
                assert_eq!(path, PathBuf::from("/keys/id_ed25519"));
                assert_eq!(passphrase.as_deref(), Some("secret"));
            }
            other => panic!("unexpected key source: {other:?}"),
        }
    }

    #[test]
    fn test_password_wins() {
        let config: Config = toml::from_str(
            r#"
[ssh]
password = "pw"
key_env = "SEALHOST_KEY"
"#,
        )
        .unwrap();
        assert!(matches!(config.ssh.key_source(), KeySource::Password(_)));
        assert!(!format!("{:?}", config.ssh).contains("pw\""));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealhost.toml");
        std::fs::write(&path, "[distribute]\nchunk_size = \"big\"").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.ssh/id_rsa"), home.join(".ssh/id_rsa"));
        }
    }
}
