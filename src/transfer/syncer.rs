//! External transfer tool invocation

use super::classifier::{Classification, OutputClassifier, OutputEvent};
use crate::image::ImageRef;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

/// Result of one transfer attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferVerdict {
    /// The tool reported success; the destination still has to be verified
    Completed,
    Failed(String),
}

impl From<Classification> for TransferVerdict {
    fn from(classification: Classification) -> Self {
        match classification {
            Classification::Completed => TransferVerdict::Completed,
            Classification::Failed(cause) => TransferVerdict::Failed(cause),
        }
    }
}

/// Moves one image described by a sync manifest
#[async_trait]
pub trait TransferTool: Send + Sync {
    async fn transfer(&self, image: &ImageRef, manifest: &Path) -> TransferVerdict;
}

/// Runs `{syncer} --images {manifest} --auth {auth} --retries {n}`
#[derive(Debug, Clone)]
pub struct SyncerProcess {
    syncer_path: PathBuf,
    auth_path: PathBuf,
    retries: u32,
}

impl SyncerProcess {
    pub fn new(syncer_path: PathBuf, auth_path: PathBuf, retries: u32) -> Self {
        Self {
            syncer_path,
            auth_path,
            retries,
        }
    }

    fn command(&self, manifest: &Path) -> Command {
        let mut command = Command::new(&self.syncer_path);
        command
            .arg("--images")
            .arg(manifest)
            .arg("--auth")
            .arg(&self.auth_path)
            .arg("--retries")
            .arg(self.retries.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl TransferTool for SyncerProcess {
    async fn transfer(&self, image: &ImageRef, manifest: &Path) -> TransferVerdict {
        let mut child = match self.command(manifest).spawn() {
            Ok(child) => child,
            Err(e) => {
                return TransferVerdict::Failed(format!(
                    "cannot start {}: {}",
                    self.syncer_path.display(),
                    e
                ));
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill().await;
            return TransferVerdict::Failed("transfer tool output not captured".to_string());
        };

        let stdout = LinesStream::new(BufReader::new(stdout).lines());
        let stderr = LinesStream::new(BufReader::new(stderr).lines());
        let mut output = stdout.merge(stderr);

        let mut classifier = OutputClassifier::new();
        while let Some(line) = output.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::debug!(image = %image, error = %e, "transfer output read error");
                    continue;
                }
            };
            tracing::debug!(image = %image, "{}", line);

            match classifier.observe(&line) {
                OutputEvent::CorruptionLimit => {
                    tracing::warn!(image = %image, "corruption limit reached, abandoning transfer");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(image = %image, error = %e, "could not kill transfer tool");
                    }
                    return classifier.finish(None).into();
                }
                OutputEvent::Corruption { seen } => {
                    tracing::warn!(image = %image, seen, "transient corruption reported");
                }
                OutputEvent::SuccessMarker | OutputEvent::Line => {}
            }
        }

        let exit_ok = match child.wait().await {
            Ok(status) => {
                if !status.success() {
                    tracing::debug!(image = %image, %status, "transfer tool exited");
                }
                status.success()
            }
            Err(e) => {
                return TransferVerdict::Failed(format!("waiting for transfer tool failed: {}", e));
            }
        };

        match classifier.finish(Some(exit_ok)) {
            Classification::Failed(cause) if !exit_ok => TransferVerdict::Failed(format!(
                "{} ({} lines of output)",
                cause,
                classifier.lines()
            )),
            other => other.into(),
        }
    }
}
