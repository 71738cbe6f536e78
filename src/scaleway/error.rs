//! Error types for the Scaleway clients.

use scaleway_rs::ScalewayError;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;

/// Errors raised by the Scaleway clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayClientError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the host image label cannot be resolved.
    #[error("image '{label}' (arch {arch}) not found in zone {zone}")]
    ImageNotFound {
        /// Image label from configuration.
        label: String,
        /// Requested architecture.
        arch: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Raised when the addressed resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Description of the missing resource.
        resource: String,
    },
    /// Raised when the zone has no stock or the project ran out of quota.
    #[error("capacity exhausted: {message}")]
    Capacity {
        /// Message returned by the API.
        message: String,
    },
    /// Raised for any other API rejection.
    #[error("scaleway API returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message returned by the API.
        message: String,
    },
    /// Raised when the request never produced a response, or the response
    /// could not be read.
    #[error("provider error: {message}")]
    Provider {
        /// Transport or decoding failure.
        message: String,
    },
}

impl ScalewayClientError {
    /// Builds a [`ScalewayClientError::Provider`].
    #[must_use]
    pub fn provider(message: impl ToString) -> Self {
        Self::Provider {
            message: message.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

const CAPACITY_ERRORS: [&str; 2] = ["out_of_stock", "quotas_exceeded"];

/// Maps a failed response to an error; `resource` names the addressed
/// object in [`ScalewayClientError::NotFound`].
pub(crate) fn classify(status: u16, body: &[u8], resource: &str) -> ScalewayClientError {
    let parsed = serde_json::from_slice::<ApiErrorBody>(body).ok();
    let message = parsed.as_ref().map_or_else(
        || String::from_utf8_lossy(body).into_owned(),
        |api| api.message.clone(),
    );
    let kind = parsed.map(|api| api.kind).unwrap_or_default();

    if status == 404 || kind == "unknown_resource" {
        return ScalewayClientError::NotFound {
            resource: resource.to_owned(),
        };
    }
    if CAPACITY_ERRORS.contains(&kind.as_str()) {
        return ScalewayClientError::Capacity { message };
    }
    ScalewayClientError::Api { status, message }
}

impl From<ScalewayError> for ScalewayClientError {
    fn from(value: ScalewayError) -> Self {
        match value {
            ScalewayError::Api(api_err) if api_err.etype == "unknown_resource" => Self::NotFound {
                resource: api_err
                    .resource
                    .unwrap_or_else(|| String::from("resource")),
            },
            ScalewayError::Api(api_err) if CAPACITY_ERRORS.contains(&api_err.etype.as_str()) => {
                Self::Capacity {
                    message: api_err.message,
                }
            }
            other => Self::provider(other),
        }
    }
}

impl From<ConfigError> for ScalewayClientError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<ScalewayClientError> for BackendError {
    fn from(value: ScalewayClientError) -> Self {
        match value {
            ScalewayClientError::NotFound { resource } => Self::NotFound { resource },
            err @ (ScalewayClientError::Config(_) | ScalewayClientError::ImageNotFound { .. }) => {
                Self::Configuration {
                    message: err.to_string(),
                }
            }
            other => Self::Provider {
                message: other.to_string(),
            },
        }
    }
}
