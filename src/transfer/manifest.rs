//! Transient sync manifest handed to the transfer tool

use crate::error::{MigratorError, Result};
use crate::image::ImageRef;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One `{source_ref: target_repo}` YAML file, alive for the duration of one transfer.
/// Dropping it without [`SyncManifest::remove`] still deletes the file.
#[derive(Debug)]
pub struct SyncManifest {
    path: PathBuf,
    removed: bool,
}

impl SyncManifest {
    pub async fn write(
        dir: &Path,
        image: &ImageRef,
        source_registry: &str,
        target_registry: &str,
    ) -> Result<Self> {
        let mapping = BTreeMap::from([(
            image.source_reference(source_registry),
            image.target_repository(target_registry),
        )]);
        let content = serde_yaml::to_string(&mapping)?;

        let path = dir.join(image.manifest_file_name());
        tokio::fs::write(&path, content).await.map_err(|e| {
            MigratorError::Transfer(format!("cannot write sync manifest {}: {}", path.display(), e))
        })?;
        Ok(Self { path, removed: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file; a failure is only logged
    pub async fn remove(mut self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::warn!(path = %self.path.display(), error = %e, "could not remove sync manifest");
        }
        self.removed = true;
    }
}

impl Drop for SyncManifest {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "sync manifest removed on drop"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "could not remove sync manifest")
            }
        }
    }
}
