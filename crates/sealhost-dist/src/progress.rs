//! Transfer throughput logging

use std::time::Instant;

use tracing::debug;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Scale a byte count to KB below 1 MB, MB below 1 GB, GB above
#[must_use]
pub fn human_size(bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let value = bytes as f64;
    if bytes < MB {
        format!("{:.2}KB", value / KB as f64)
    } else if bytes < GB {
        format!("{:.2}MB", value / MB as f64)
    } else {
        format!("{:.2}GB", value / GB as f64)
    }
}

/// Running byte count of one file transfer
#[derive(Debug)]
pub struct Progress<'a> {
    host: &'a str,
    path: &'a str,
    total: u64,
    started: Instant,
}

impl<'a> Progress<'a> {
    #[must_use]
    pub fn new(host: &'a str, path: &'a str) -> Self {
        Self {
            host,
            path,
            total: 0,
            started: Instant::now(),
        }
    }

    /// Account for a written chunk and log the running totals
    pub fn record(&mut self, chunk: usize) {
        self.total += chunk as u64;
        debug!(
            host = %self.host,
            path = %self.path,
            chunk = %human_size(chunk as u64),
            total = %human_size(self.total),
            rate = %format!("{}/s", human_size(self.rate())),
            "transfer progress"
        );
    }

    /// Bytes written so far
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    fn rate(&self) -> u64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs <= f64::EPSILON {
            return self.total;
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rate = (self.total as f64 / secs) as u64;
        rate
    }
}
