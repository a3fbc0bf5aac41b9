//! Bearer token authentication against the target registry
//!
//! The token endpoint is discovered once from the `WWW-Authenticate` header
//! of an unauthenticated `GET /v2/`. Tokens are then requested per
//! repository with basic auth and are not cached.

use crate::config::AuthConfig;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{MigratorError, Result};
use reqwest::{Client, StatusCode, header::WWW_AUTHENTICATE};
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

/// Parsed `Bearer realm="...",service="..."` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: String,
    pub service: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Parse a Bearer challenge header. Anything else, or a challenge without a
/// realm, yields `None`.
pub fn parse_auth_challenge(header: &str) -> Option<AuthChallenge> {
    let params_str = header.trim().strip_prefix("Bearer ")?;
    let mut params = HashMap::new();

    for param in params_str.split(',') {
        let param = param.trim();
        if let Some((key, value)) = param.split_once('=') {
            params.insert(key.trim(), value.trim().trim_matches('"'));
        }
    }

    let realm = params.get("realm")?;
    Some(AuthChallenge {
        realm: realm.to_string(),
        service: params.get("service").copied().unwrap_or_default().to_string(),
    })
}

/// Scope requested for every verification token
pub fn repository_scope(project: &str, repo: &str) -> String {
    if repo.is_empty() {
        format!("repository:{}:pull,push,delete", project)
    } else {
        format!("repository:{}/{}:pull,push,delete", project, repo)
    }
}

#[derive(Debug, Clone)]
pub struct Auth {
    client: Client,
    credentials: AuthConfig,
    challenge: Option<AuthChallenge>,
}

impl Auth {
    /// Probe `{registry_url}/v2/` and remember the advertised token endpoint.
    ///
    /// A registry that does not challenge is used without tokens. A registry
    /// that cannot be reached at all is a configuration error.
    pub async fn discover(client: Client, registry_url: &str, credentials: AuthConfig) -> Result<Self> {
        let url = format!("{}/v2/", registry_url.trim_end_matches('/'));
        let response = client.get(&url).send().await.map_err(|e| {
            MigratorError::Config(format!("target registry {} unreachable: {}", registry_url, e))
        })?;

        let challenge = if response.status() == StatusCode::UNAUTHORIZED {
            response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_auth_challenge)
        } else {
            None
        };

        match &challenge {
            Some(c) => tracing::info!(realm = %c.realm, service = %c.service, "registry token endpoint discovered"),
            None => tracing::info!(registry = registry_url, "registry did not challenge, verifying without tokens"),
        }

        Ok(Self {
            client,
            credentials,
            challenge,
        })
    }

    pub fn challenge(&self) -> Option<&AuthChallenge> {
        self.challenge.as_ref()
    }

    /// Fetch a token scoped to one repository, or `None` for a registry without auth
    pub async fn token(&self, project: &str, repo: &str) -> Result<Option<String>> {
        let Some(challenge) = &self.challenge else {
            return Ok(None);
        };

        let scope = repository_scope(project, repo);
        let url = Url::parse_with_params(
            &challenge.realm,
            &[
                ("account", self.credentials.username.as_str()),
                ("scope", scope.as_str()),
                ("service", challenge.service.as_str()),
            ],
        )?;
        tracing::debug!(%url, "requesting registry token");

        let response = self
            .client
            .get(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token request"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_auth_error(status, &text));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token response"))?;

        body.token
            .or(body.access_token)
            .filter(|token| !token.is_empty())
            .map(Some)
            .ok_or_else(|| MigratorError::Verification("token response carried no token".to_string()))
    }
}
