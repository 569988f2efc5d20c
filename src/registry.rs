//! Docker Hub registry client.
//!
//! Three HTTPS calls, nothing more: anonymous token, v2 manifest, layer blob.
//! Every transport failure, non-200 status, and unparsable body is classified
//! retryable at the source; the callers in [`crate::image`] wrap these calls
//! in [`crate::retry::retry`].

use bytes::Bytes;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::debug;

use crate::constants::{
    DOCKER_AUTH_SERVICE, DOCKER_AUTH_URL, DOCKER_REGISTRY_URL, MANIFEST_V2_MEDIA_TYPE,
    MAX_LAYER_SIZE,
};
use crate::error::{Error, Result};

/// Client for anonymous pulls of `library/` images.
pub struct RegistryClient {
    http: reqwest::Client,
    auth_base: String,
    registry_base: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    layers: Vec<LayerDescriptor>,
}

#[derive(Debug, Deserialize)]
struct LayerDescriptor {
    digest: String,
}

impl RegistryClient {
    /// Client against the public Docker Hub endpoints.
    pub fn docker_hub() -> Result<Self> {
        Self::with_endpoints(DOCKER_AUTH_URL, DOCKER_REGISTRY_URL)
    }

    /// Client against explicit endpoints. Building the underlying HTTP client
    /// loads CA certificates from the host trust store, so this must happen
    /// before the root filesystem is pivoted away.
    pub fn with_endpoints(
        auth_base: impl Into<String>,
        registry_base: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| Error::HttpClient(err.to_string()))?;
        Ok(Self {
            http,
            auth_base: auth_base.into(),
            registry_base: registry_base.into(),
        })
    }

    /// Fetches an anonymous pull token. The endpoint answers with either
    /// `token` or `access_token` depending on the auth backend; accept both.
    pub async fn token(&self, image: &str) -> Result<String> {
        let url = format!("{}/token", self.auth_base);
        let scope = format!("repository:library/{image}:pull");
        let response = self
            .http
            .get(&url)
            .query(&[("service", DOCKER_AUTH_SERVICE), ("scope", &scope)])
            .send()
            .await
            .map_err(|err| transport_err(&url, err))?;
        let response = expect_ok(&url, response)?;
        let data: TokenResponse = response
            .json()
            .await
            .map_err(|err| transport_err(&url, err))?;

        if !data.token.is_empty() {
            return Ok(data.token);
        }
        if !data.access_token.is_empty() {
            return Ok(data.access_token);
        }
        Err(Error::MissingToken.retryable())
    }

    /// Fetches the v2 manifest and returns the layer digests in apply order.
    pub async fn layer_digests(&self, token: &str, image: &str, tag: &str) -> Result<Vec<String>> {
        let url = format!("{}/v2/library/{image}/manifests/{tag}", self.registry_base);
        let response = self
            .http
            .get(&url)
            .header(ACCEPT, MANIFEST_V2_MEDIA_TYPE)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| transport_err(&url, err))?;
        let response = expect_ok(&url, response)?;
        let manifest: Manifest = response
            .json()
            .await
            .map_err(|err| transport_err(&url, err))?;
        Ok(manifest.layers.into_iter().map(|l| l.digest).collect())
    }

    /// Downloads one gzipped tar layer blob.
    pub async fn blob(&self, token: &str, image: &str, digest: &str) -> Result<Bytes> {
        let url = format!("{}/v2/library/{image}/blobs/{digest}", self.registry_base);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| transport_err(&url, err))?;
        let response = expect_ok(&url, response)?;
        let blob = response
            .bytes()
            .await
            .map_err(|err| transport_err(&url, err))?;

        if blob.len() > MAX_LAYER_SIZE {
            return Err(Error::LayerTooLarge {
                digest: digest.to_string(),
                size: blob.len(),
                limit: MAX_LAYER_SIZE,
            });
        }
        debug!(digest, size = blob.len(), "downloaded layer blob");
        Ok(blob)
    }
}

fn transport_err(url: &str, err: reqwest::Error) -> Error {
    Error::RegistryRequest {
        url: url.to_string(),
        reason: err.to_string(),
    }
    .retryable()
}

fn expect_ok(url: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.as_u16() == 200 {
        Ok(response)
    } else {
        Err(Error::UnexpectedStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }
        .retryable())
    }
}
