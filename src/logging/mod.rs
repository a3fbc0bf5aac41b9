//! Logging and user-facing output
//!
//! All output goes through `tracing`. [`init`] installs the subscriber once per
//! process; [`Logger`] is the thin facade the runner and the pool use for
//! section headings, summaries and the human-readable size/time/speed formats.

use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `verbose`.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init();
}

/// Logger responsible for all user-visible output
#[derive(Debug, Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self { verbose, quiet: false }
    }

    pub fn new_quiet() -> Self {
        Self { verbose: false, quiet: true }
    }

    /// Main section heading
    pub fn section(&self, title: &str) {
        if !self.quiet {
            tracing::info!("=== {} ===", title);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            tracing::info!("{}", message);
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            tracing::info!(outcome = "success", "{}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            tracing::warn!("{}", message);
        }
    }

    /// Errors are emitted even in quiet mode
    pub fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }

    /// Detailed information (only shown in verbose mode)
    pub fn detail(&self, message: &str) {
        if self.verbose && !self.quiet {
            tracing::debug!("{}", message);
        }
    }

    /// Key-value pair summary display
    pub fn summary_kv(&self, title: &str, items: &[(&str, String)]) {
        if !self.quiet {
            self.section(title);
            for (key, value) in items {
                tracing::info!("  {}: {}", key, value);
            }
        }
    }

    /// Format file size in human-readable units
    pub fn format_size(&self, bytes: u64) -> String {
        if bytes < 1024 {
            format!("{} B", bytes)
        } else if bytes < 1024 * 1024 {
            format!("{:.1} KB", bytes as f64 / 1024.0)
        } else if bytes < 1024 * 1024 * 1024 {
            format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
        }
    }

    /// Format an elapsed time as `HH:MM:SS`; hours are not wrapped at 24
    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }

    /// Throughput in MB/s over `elapsed`
    pub fn format_speed(&self, bytes: u64, elapsed: Duration) -> String {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return "0.00 MB/s".to_string();
        }
        format!("{:.2} MB/s", bytes as f64 / (1024.0 * 1024.0) / secs)
    }
}
