//! Content fingerprints (SHA-256, lower-case hex)
//!
//! Local and remote digests use the same algorithm so they compare as plain
//! strings.

use std::path::Path;

use sealhost_exec::{RemoteExecutor, shell_quote};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::DistError;

const READ_BUF: usize = 64 * 1024;

/// Fingerprint of a local file, streamed
///
/// # Errors
/// Returns `DistError::SourceNotFound` or `DistError::Io` when the file cannot be read
pub async fn local_fingerprint(path: &Path) -> Result<String, DistError> {
    let mut file = File::open(path).await.map_err(|e| DistError::io(path, &e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF];

    loop {
        let n = file.read(&mut buf).await.map_err(|e| DistError::io(path, &e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprint of an in-memory buffer
#[must_use]
pub fn bytes_fingerprint(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Fingerprint of a file on the host behind `session`
///
/// # Errors
/// Session errors propagate; a failing digest command or output that is not
/// a SHA-256 digest yields `DistError::RemoteFingerprint`
pub async fn remote_fingerprint(
    session: &dyn RemoteExecutor,
    path: &str,
) -> Result<String, DistError> {
    let cmd = format!("sha256sum {}", shell_quote(path));
    let result = session.run(&cmd).await?;
    let fingerprint_error = |reason: String| DistError::RemoteFingerprint {
        path: path.to_string(),
        reason,
    };

    if !result.success() {
        return Err(fingerprint_error(format!(
            "exit {}: {}",
            result.status,
            result.stderr.trim()
        )));
    }

    let digest = parse_digest(&result.stdout)
        .ok_or_else(|| fingerprint_error(format!("unexpected output {:?}", result.trimmed_stdout())))?;
    debug!(path = %path, digest = %digest, "remote fingerprint");
    Ok(digest)
}

/// First field of `sha256sum` output, if it is a hex SHA-256 digest
fn parse_digest(output: &str) -> Option<String> {
    let field = output.split_whitespace().next()?;
    (field.len() == 64 && field.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| field.to_ascii_lowercase())
}
