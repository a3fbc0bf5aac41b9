//! Image identity and naming rules
//!
//! An [`ImageRef`] is selected once and never changes afterwards. The helpers
//! here derive every name the rest of the pipeline needs from it: the source
//! reference handed to the transfer tool, the target repository, the
//! project/repository pair the verifier queries and the file name of the
//! transient sync manifest.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one image to migrate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Catalog id, when the image came from (or is known to) the catalog
    pub id: Option<i64>,
    pub name: String,
    pub tag: String,
    /// Size recorded by the source catalog; informational only
    pub size: Option<u64>,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            tag: tag.into(),
            size: None,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// `{source_registry}/{name}:{tag}`
    pub fn source_reference(&self, source_registry: &str) -> String {
        format!("{}/{}:{}", source_registry.trim_end_matches('/'), self.name, self.tag)
    }

    /// `{target_registry}/{name}`
    pub fn target_repository(&self, target_registry: &str) -> String {
        format!("{}/{}", target_registry.trim_end_matches('/'), self.name)
    }

    /// Split the name into the registry project (first segment) and repository (the rest)
    pub fn project_and_repo(&self) -> (&str, &str) {
        match self.name.split_once('/') {
            Some((project, repo)) => (project, repo),
            None => (self.name.as_str(), ""),
        }
    }

    /// File name of the transient sync manifest for this image
    pub fn manifest_file_name(&self) -> String {
        format!("{}:{}.yaml", self.name.replace('/', "-"), self.tag)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_names() {
        let image = ImageRef::new("library/nginx", "1.25");
        assert_eq!(image.source_reference("old.local/"), "old.local/library/nginx:1.25");
        assert_eq!(image.target_repository("harbor.local"), "harbor.local/library/nginx");
        assert_eq!(image.to_string(), "library/nginx:1.25");
    }

    #[test]
    fn test_project_and_repo_split() {
        assert_eq!(ImageRef::new("ai/train/pytorch", "2.1").project_and_repo(), ("ai", "train/pytorch"));
        assert_eq!(ImageRef::new("busybox", "latest").project_and_repo(), ("busybox", ""));
    }

    #[test]
    fn test_manifest_file_name_flattens_slashes() {
        let image = ImageRef::new("ai/train/pytorch", "2.1");
        assert_eq!(image.manifest_file_name(), "ai-train-pytorch:2.1.yaml");
    }
}
