//! Post-transfer verification against the target registry
//!
//! An image counts as migrated only when its manifest can be fetched from
//! the target and declares a positive total layer size.

use super::auth::Auth;
use crate::config::AuthConfig;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{MigratorError, Result};
use crate::image::ImageRef;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::time::Duration;

pub const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const IDLE_CONNECTIONS: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestResponse {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub layers: Vec<LayerInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerInfo {
    #[serde(default)]
    pub media_type: Option<String>,
    pub size: u64,
    #[serde(default)]
    pub digest: String,
}

impl ManifestResponse {
    pub fn total_size(&self) -> u64 {
        self.layers.iter().map(|layer| layer.size).sum()
    }
}

/// Confirms that an image reached the destination
#[async_trait]
pub trait ImageVerifier: Send + Sync {
    /// Verified byte size at the destination. Zero is never returned as `Ok`.
    async fn verify(&self, image: &ImageRef, deadline: Duration) -> Result<u64>;
}

pub struct RegistryVerifier {
    client: Client,
    registry_url: String,
    auth: Auth,
}

impl RegistryVerifier {
    /// Build the HTTP client and discover the registry's token endpoint
    pub async fn connect(registry_url: &str, credentials: AuthConfig, insecure: bool) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(IDLE_CONNECTIONS)
            .build()?;

        let registry_url = registry_url.trim_end_matches('/').to_string();
        let auth = Auth::discover(client.clone(), &registry_url, credentials).await?;

        Ok(Self {
            client,
            registry_url,
            auth,
        })
    }

    /// Sum of the layer sizes of `project/repo:tag`, bounded by `deadline`
    pub async fn manifest_size(&self, project: &str, repo: &str, tag: &str, deadline: Duration) -> Result<u64> {
        let image = if repo.is_empty() {
            format!("{}:{}", project, tag)
        } else {
            format!("{}/{}:{}", project, repo, tag)
        };

        let size = tokio::time::timeout(deadline, self.fetch_manifest_size(project, repo, tag, &image))
            .await
            .map_err(|_| NetworkErrorHandler::deadline_exceeded(&format!("verification of {}", image), deadline))??;

        if size == 0 {
            return Err(MigratorError::Verification(format!(
                "manifest of {} declares no layer data",
                image
            )));
        }
        Ok(size)
    }

    async fn fetch_manifest_size(&self, project: &str, repo: &str, tag: &str, image: &str) -> Result<u64> {
        let token = self.auth.token(project, repo).await?;

        let path = if repo.is_empty() {
            project.to_string()
        } else {
            format!("{}/{}", project, repo)
        };
        let url = format!("{}/v2/{}/manifests/{}", self.registry_url, path, tag);

        let mut request = self.client.get(&url).header(ACCEPT, MANIFEST_V2);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "manifest request"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_manifest_error(status, &text, image));
        }

        let manifest: ManifestResponse = response
            .json()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "manifest response"))?;
        tracing::debug!(
            image,
            schema = manifest.schema_version,
            layers = manifest.layers.len(),
            "manifest fetched"
        );
        Ok(manifest.total_size())
    }
}

#[async_trait]
impl ImageVerifier for RegistryVerifier {
    async fn verify(&self, image: &ImageRef, deadline: Duration) -> Result<u64> {
        let (project, repo) = image.project_and_repo();
        self.manifest_size(project, repo, &image.tag, deadline).await
    }
}
