//! Administrative REST calls.
//!
//! These run out of band, next to the realtime connection: saving the
//! permissions attached to an authentication token, and managing presence
//! on a channel. Calls that carry the private key should only be made over
//! HTTPS.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::channel::is_safe_input;
use crate::cluster::{http_client, ClusterResolver, HttpClusterResolver};
use crate::config::RestConfig;

/// REST errors.
#[derive(Debug, Error)]
pub enum RestError {
    /// An argument was rejected before any request was made.
    #[error("{0}")]
    Validation(String),

    /// The request failed at the HTTP layer.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an unexpected status.
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be interpreted.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Permission granted on a channel by [`RestClient::save_authentication`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPermission {
    /// Subscribe to the channel.
    Read,
    /// Subscribe and publish.
    Write,
    /// Query presence.
    Presence,
}

impl ChannelPermission {
    /// Wire code of the permission.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelPermission::Read => "r",
            ChannelPermission::Write => "w",
            ChannelPermission::Presence => "p",
        }
    }
}

impl fmt::Display for ChannelPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a REST call is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A server address, used as is.
    Server(String),
    /// A cluster URL, resolved to a server before every call.
    Cluster(String),
}

impl Endpoint {
    /// Build an endpoint from a URL and a cluster flag.
    #[must_use]
    pub fn new(url: impl Into<String>, is_cluster: bool) -> Self {
        if is_cluster {
            Endpoint::Cluster(url.into())
        } else {
            Endpoint::Server(url.into())
        }
    }
}

/// Parameters of [`RestClient::save_authentication`].
#[derive(Debug, Clone)]
pub struct AuthenticationRequest {
    /// Token being authorized.
    pub auth_token: String,
    /// Whether the token is private.
    pub is_private: bool,
    /// Application key.
    pub app_key: String,
    /// Lifetime of the grant, in seconds.
    pub ttl: u64,
    /// Private key of the application.
    pub private_key: String,
    /// Channels and the permission granted on each.
    pub permissions: BTreeMap<String, ChannelPermission>,
}

/// Presence data of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresenceInfo {
    /// Number of subscriptions.
    pub subscriptions: u64,
    /// Connection metadata and how many subscribers carry it, when enabled.
    #[serde(default)]
    pub metadata: Option<HashMap<String, u64>>,
}

/// Client for the administrative REST endpoints.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    timeout: Duration,
    resolver: Arc<dyn ClusterResolver>,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient").finish_non_exhaustive()
    }
}

impl RestClient {
    /// Create a client resolving clusters over HTTP.
    #[must_use]
    pub fn new(config: &RestConfig) -> Self {
        let timeout = config.timeout();
        let http = http_client(timeout);
        let resolver = Arc::new(HttpClusterResolver::with_client(http.clone(), timeout));
        Self {
            http,
            timeout,
            resolver,
        }
    }

    /// Create a client using a custom cluster resolver.
    #[must_use]
    pub fn with_resolver(timeout: Duration, resolver: Arc<dyn ClusterResolver>) -> Self {
        Self {
            http: http_client(timeout),
            timeout,
            resolver,
        }
    }

    async fn server(&self, endpoint: &Endpoint, app_key: &str) -> Result<String, RestError> {
        match endpoint {
            Endpoint::Server(url) => Ok(url.clone()),
            Endpoint::Cluster(url) => self.resolver.resolve(url, app_key).await.map_err(|e| {
                debug!(cluster_url = %url, error = %e, "Cluster resolution failed");
                RestError::Validation("Error getting server from Cluster".into())
            }),
        }
    }

    /// Save the channel permissions of an authentication token.
    ///
    /// Succeeds only if the server answers `201 Created`.
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid channel name, a failed request or
    /// any other status.
    pub async fn save_authentication(
        &self,
        endpoint: &Endpoint,
        request: &AuthenticationRequest,
    ) -> Result<(), RestError> {
        let body = authentication_body(request)?;
        let server = self.server(endpoint, &request.app_key).await?;
        let url = join_url(&server, "authenticate");
        debug!(url = %url, channels = request.permissions.len(), "Saving authentication");

        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 201 {
            return Ok(());
        }
        Err(RestError::Status {
            status,
            body: response.text().await.unwrap_or_default(),
        })
    }

    /// Get the presence data of a channel.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid arguments, a failed request, a status
    /// other than `200` or an unreadable body.
    pub async fn presence(
        &self,
        endpoint: &Endpoint,
        app_key: &str,
        auth_token: &str,
        channel: &str,
    ) -> Result<PresenceInfo, RestError> {
        let path = presence_path(&[app_key, auth_token, channel])?;
        let server = self.server(endpoint, app_key).await?;
        let url = join_url(&server, &path);
        debug!(url = %url, "Fetching presence");

        let body = ok_body(self.http.get(url).timeout(self.timeout).send().await?).await?;
        serde_json::from_str(&body).map_err(|e| RestError::InvalidResponse(e.to_string()))
    }

    /// Enable presence on a channel, optionally collecting connection metadata.
    ///
    /// Returns the server's response body.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid arguments, a failed request or a status
    /// other than `200`.
    pub async fn enable_presence(
        &self,
        endpoint: &Endpoint,
        app_key: &str,
        private_key: &str,
        channel: &str,
        metadata: bool,
    ) -> Result<String, RestError> {
        let path = presence_path(&["enable", app_key, channel])?;
        let body = enable_presence_body(private_key, metadata);
        self.post_presence(endpoint, app_key, &path, body).await
    }

    /// Disable presence on a channel.
    ///
    /// Returns the server's response body.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid arguments, a failed request or a status
    /// other than `200`.
    pub async fn disable_presence(
        &self,
        endpoint: &Endpoint,
        app_key: &str,
        private_key: &str,
        channel: &str,
    ) -> Result<String, RestError> {
        let path = presence_path(&["disable", app_key, channel])?;
        let body = disable_presence_body(private_key);
        self.post_presence(endpoint, app_key, &path, body).await
    }

    async fn post_presence(
        &self,
        endpoint: &Endpoint,
        app_key: &str,
        path: &str,
        body: String,
    ) -> Result<String, RestError> {
        let server = self.server(endpoint, app_key).await?;
        let url = join_url(&server, path);
        debug!(url = %url, "Updating presence");

        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;
        ok_body(response).await
    }
}

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

async fn ok_body(response: reqwest::Response) -> Result<String, RestError> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    if status == 200 {
        Ok(body)
    } else {
        Err(RestError::Status { status, body })
    }
}

/// Append `path` to `server`, with exactly one `/` between them.
#[must_use]
pub fn join_url(server: &str, path: &str) -> String {
    format!("{}/{}", server.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Build `presence/<segment>/...`, rejecting segments outside the safe charset.
fn presence_path(segments: &[&str]) -> Result<String, RestError> {
    for segment in segments {
        if segment.is_empty() || !is_safe_input(segment) {
            return Err(RestError::Validation(format!(
                "Invalid presence argument: '{}'",
                segment
            )));
        }
    }
    Ok(format!("presence/{}", segments.join("/")))
}

/// Form body of a save-authentication request.
///
/// # Errors
///
/// Returns an error if a channel name contains characters outside
/// `[\w\-:/.]` or is empty.
pub fn authentication_body(request: &AuthenticationRequest) -> Result<String, RestError> {
    let mut body = format!(
        "AT={}&AK={}&PK={}&TTL={}&PVT={}&TP={}",
        urlencoding::encode(&request.auth_token),
        urlencoding::encode(&request.app_key),
        urlencoding::encode(&request.private_key),
        request.ttl,
        if request.is_private { "1" } else { "0" },
        request.permissions.len(),
    );

    for (channel, permission) in &request.permissions {
        if channel.is_empty() || !is_safe_input(channel) {
            return Err(RestError::Validation(format!(
                "Invalid channel name: {}",
                channel
            )));
        }
        body.push('&');
        body.push_str(channel);
        body.push('=');
        body.push_str(permission.as_str());
    }

    Ok(body)
}

/// Form body of an enable-presence request.
#[must_use]
pub fn enable_presence_body(private_key: &str, metadata: bool) -> String {
    format!(
        "privatekey={}&metadata={}",
        urlencoding::encode(private_key),
        if metadata { "1" } else { "0" }
    )
}

/// Form body of a disable-presence request.
#[must_use]
pub fn disable_presence_body(private_key: &str) -> String {
    format!("privatekey={}", urlencoding::encode(private_key))
}
