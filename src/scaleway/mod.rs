//! Scaleway Instances API clients for the container-instance strategy.
//!
//! Each game server runs on its own instance: the game image is started
//! under Docker by a cloud-init script, and a security group named after
//! the server id opens the game, console, and spectator ports. Instances and
//! groups are found again by name, so deletion needs only the server id and
//! its zone.

mod cloud_init;
mod error;
mod firewall;
mod image;
mod instance;

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, RequestBuilder};
use scaleway_rs::ScalewayApi;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ScalewayConfig;
use crate::domain::ServerId;

pub use cloud_init::render_user_data;
pub use error::ScalewayClientError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";
const RESOURCE_PREFIX: &str = "quickserver";

/// Client for the Scaleway Instances API.
///
/// Implements both [`crate::backend::FirewallService`] and
/// [`crate::backend::InstanceService`].
#[derive(Clone)]
pub struct ScalewayClient {
    api: ScalewayApi,
    http: Client,
    config: ScalewayConfig,
    base_url: String,
}

impl ScalewayClient {
    /// Constructs a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayClientError::Config`] when the provided configuration
    /// fails validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayClientError> {
        config.validate()?;
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            http,
            config,
            base_url: String::from(SCALEWAY_INSTANCE_API_BASE),
        })
    }

    /// Points REST calls at another base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn zone_url(&self, zone: &str, path: &str) -> String {
        format!("{}/zones/{zone}/{path}", self.base_url)
    }

    fn authorised(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("X-Auth-Token", &self.config.secret_key)
    }

    async fn send_raw(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<Bytes, ScalewayClientError> {
        let response = self
            .authorised(request)
            .send()
            .await
            .map_err(ScalewayClientError::provider)?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(ScalewayClientError::provider)?;
        debug!(resource, status = status.as_u16(), "scaleway response");
        if status.is_success() {
            return Ok(body);
        }
        Err(error::classify(status.as_u16(), &body, resource))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<T, ScalewayClientError> {
        let body = self.send_raw(request, resource).await?;
        serde_json::from_slice(&body).map_err(ScalewayClientError::provider)
    }
}

impl std::fmt::Debug for ScalewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewayClient")
            .field("project", &self.config.default_project_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Name given to every resource belonging to `server_id`.
#[must_use]
pub fn resource_name(server_id: &ServerId) -> String {
    format!("{RESOURCE_PREFIX}-{server_id}")
}
