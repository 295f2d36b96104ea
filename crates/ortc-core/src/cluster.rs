//! Cluster discovery.
//!
//! A cluster URL answers `GET <cluster>?appkey=<key>` with a small script
//! assigning the address of the server to use, e.g.
//! `var SOCKET_SERVER = "https://ortc-node-12.example.com/server/ssl/2.1";`.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::rest::RestError;

/// Resolves a cluster URL to the address of one server.
#[async_trait]
pub trait ClusterResolver: Send + Sync {
    /// Return the server address assigned to `app_key` by the cluster.
    async fn resolve(&self, cluster_url: &str, app_key: &str) -> Result<String, RestError>;
}

/// Resolver performing the discovery request over HTTP.
#[derive(Debug, Clone)]
pub struct HttpClusterResolver {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpClusterResolver {
    /// Create a resolver whose requests time out after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(http_client(timeout), timeout)
    }

    /// Create a resolver sharing an existing HTTP client.
    ///
    /// `timeout` is applied to every discovery request.
    #[must_use]
    pub fn with_client(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

/// Build an HTTP client with a request timeout.
///
/// If the builder fails the default client is used instead; callers also
/// set `timeout` on each request so it holds either way.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    match reqwest::Client::builder().timeout(timeout).build() {
        Ok(http) => http,
        Err(e) => {
            warn!(error = %e, "Failed to build HTTP client, using defaults");
            reqwest::Client::new()
        }
    }
}

#[async_trait]
impl ClusterResolver for HttpClusterResolver {
    async fn resolve(&self, cluster_url: &str, app_key: &str) -> Result<String, RestError> {
        let url = discovery_url(cluster_url, app_key)?;
        debug!(url = %url, "Resolving cluster");

        let response = self.http.get(url).timeout(self.timeout).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if status != 200 {
            return Err(RestError::Status { status, body });
        }

        parse_cluster_response(&body)
            .ok_or_else(|| RestError::InvalidResponse("no server address in cluster response".into()))
    }
}

/// Build the discovery request URL.
///
/// # Errors
///
/// Returns an error if `cluster_url` is not a valid URL.
pub fn discovery_url(cluster_url: &str, app_key: &str) -> Result<Url, RestError> {
    let mut url = Url::parse(cluster_url)
        .map_err(|e| RestError::Validation(format!("Invalid Cluster URL: {}", e)))?;
    url.query_pairs_mut().append_pair("appkey", app_key);
    Ok(url)
}

/// Extract the quoted server address from a discovery response body.
#[must_use]
pub fn parse_cluster_response(body: &str) -> Option<String> {
    let start = body.find('"')? + 1;
    let len = body[start..].find('"')?;
    let server = body[start..start + len].trim();
    (!server.is_empty()).then(|| server.to_string())
}
