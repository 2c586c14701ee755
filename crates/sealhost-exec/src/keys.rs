//! SSH credential management and resolution

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// How a session authenticates
#[derive(Clone)]
pub enum KeySource {
    /// Plain password authentication
    Password(String),
    /// Private key file, optionally encrypted with a passphrase
    Path {
        /// Key file location
        path: PathBuf,
        /// Passphrase for an encrypted key
        passphrase: Option<String>,
    },
    /// Base64-encoded private key read from an environment variable
    Env(String),
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Password(_) => f.write_str("Password(***)"),
            KeySource::Path { path, passphrase } => f
                .debug_struct("Path")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "***"))
                .finish(),
            KeySource::Env(var) => f.debug_tuple("Env").field(var).finish(),
        }
    }
}

impl KeySource {
    /// Key file without passphrase
    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        KeySource::Path {
            path: path.into(),
            passphrase: None,
        }
    }

    /// Resolve to something the SSH client can authenticate with
    ///
    /// For `Env`, decodes base64 and writes to a temp file
    ///
    /// # Errors
    /// Returns `KeyError` if key resolution fails (env not set, invalid base64, etc.)
    pub fn resolve(&self) -> Result<ResolvedKey, KeyError> {
        match self {
            KeySource::Password(password) => Ok(ResolvedKey::Password(password.clone())),
            KeySource::Path { path, passphrase } => {
                validate_key_permissions(path)?;
                Ok(ResolvedKey::Path {
                    path: path.clone(),
                    passphrase: passphrase.clone(),
                })
            }
            KeySource::Env(var_name) => {
                let base64_key =
                    env::var(var_name).map_err(|_| KeyError::EnvNotSet(var_name.clone()))?;
                let key_data = base64_decode(&base64_key).map_err(|_| KeyError::InvalidBase64)?;

                let temp_path = write_temp_key(&key_data)?;
                Ok(ResolvedKey::Temp(temp_path))
            }
        }
    }
}

/// Resolved credential
pub enum ResolvedKey {
    /// Password
    Password(String),
    /// Path to key file
    Path {
        /// Key file location
        path: PathBuf,
        /// Passphrase for an encrypted key
        passphrase: Option<String>,
    },
    /// Temporary key file (deleted on drop)
    Temp(PathBuf),
}

impl fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedKey::Password(_) => f.write_str("Password(***)"),
            ResolvedKey::Path { path, .. } => f.debug_tuple("Path").field(path).finish(),
            ResolvedKey::Temp(path) => f.debug_tuple("Temp").field(path).finish(),
        }
    }
}

impl ResolvedKey {
    /// Key file path, if this is key-based auth
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ResolvedKey::Path { path, .. } | ResolvedKey::Temp(path) => Some(path),
            ResolvedKey::Password(_) => None,
        }
    }

    /// Passphrase for the key file
    #[must_use]
    pub fn passphrase(&self) -> Option<&str> {
        match self {
            ResolvedKey::Path { passphrase, .. } => passphrase.as_deref(),
            _ => None,
        }
    }

    /// Password, if this is password auth
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        match self {
            ResolvedKey::Password(password) => Some(password),
            _ => None,
        }
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

fn validate_key_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(KeyError::Io)?;
    let mode = metadata.permissions().mode();

    // group/other bits must be clear
    if mode & 0o77 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}

fn write_temp_key(key_data: &[u8]) -> Result<PathBuf, KeyError> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let temp_path = std::env::temp_dir().join(format!("sealhost_ssh_key_{}", std::process::id()));

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&temp_path)?;
    file.write_all(key_data)?;

    debug!(path = %temp_path.display(), "wrote temporary SSH key");

    Ok(temp_path)
}

impl Drop for ResolvedKey {
    fn drop(&mut self) {
        if let ResolvedKey::Temp(path) = self
            && let Err(e) = std::fs::remove_file(&*path)
        {
            warn!(path = %path.display(), error = %e, "failed to remove temp key");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn test_password_resolves_without_io() {
        let key = KeySource::Password("secret".to_string()).resolve().unwrap();
        assert_eq!(key.password(), Some("secret"));
        assert!(key.path().is_none());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let source = KeySource::Path {
            path: PathBuf::from("/root/.ssh/id_rsa"),
            passphrase: Some("hunter2".to_string()),
        };
        let printed = format!("{source:?} {:?}", KeySource::Password("hunter2".into()));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_key_file_permissions_enforced() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = KeySource::key_file(file.path()).resolve().unwrap_err();
        assert!(matches!(err, KeyError::BadPermissions(_)));

        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600)).unwrap();
        let key = KeySource::Path {
            path: file.path().to_path_buf(),
            passphrase: Some("pw".to_string()),
        }
        .resolve()
        .unwrap();
        assert_eq!(key.passphrase(), Some("pw"));
    }

    #[test]
    fn test_env_key_missing() {
        let err = KeySource::Env("SEALHOST_TEST_KEY_THAT_IS_NOT_SET".to_string())
            .resolve()
            .unwrap_err();
        assert!(matches!(err, KeyError::EnvNotSet(_)));
    }
}
