//! Error types for the Databricks extension

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for resource reconciliation
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No token source produced an access token
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The Databricks REST API returned a non-success status
    #[error("Databricks API {method} {path} failed with {status} {reason}: {body}")]
    Api {
        method: String,
        path: String,
        status: u16,
        reason: String,
        body: String,
    },

    /// The desired specification is invalid; raised before any remote call
    #[error("validation error: {0}")]
    Validation(String),

    /// The remote service reports a conflicting resource we cannot resolve
    #[error("conflict: {0}")]
    Conflict(String),

    /// A cluster did not converge within the polling budget
    #[error(
        "timed out waiting for cluster {cluster_id} to reach {desired_state} after {}s",
        .budget.as_secs()
    )]
    Timeout {
        cluster_id: String,
        desired_state: String,
        budget: Duration,
    },

    /// A cluster entered a state it will not leave on its own
    #[error("cluster {cluster_id} entered {state} while waiting for {desired_state}")]
    TerminalState {
        cluster_id: String,
        desired_state: String,
        state: String,
    },

    /// The final poll attempt failed
    #[error(
        "polling cluster {cluster_id} for {desired_state} failed after {attempts} attempts: {source}"
    )]
    PollFailed {
        cluster_id: String,
        desired_state: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No handler is registered for the requested resource type
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    /// Invalid process or request configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// HTTP status carried by an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the remote resource does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api { status, body, .. } => {
                *status == 404 || body.contains("RESOURCE_DOES_NOT_EXIST")
            },
            _ => false,
        }
    }

    /// True when the remote service rejected a create because the resource exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Api { status, body, .. } => {
                *status == 409
                    || body.contains("RESOURCE_ALREADY_EXISTS")
                    || body.to_lowercase().contains("already exists")
            },
            _ => false,
        }
    }

    /// Stable machine-readable code reported to the host
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AuthenticationFailed",
            Self::Api { .. } => "RemoteApiFailed",
            Self::Validation(_) => "ValidationFailed",
            Self::Conflict(_) => "Conflict",
            Self::Timeout { .. } => "Timeout",
            Self::TerminalState { .. } => "TerminalState",
            Self::PollFailed { .. } => "PollFailed",
            Self::Cancelled => "Cancelled",
            Self::Http(_) => "HttpError",
            Self::Serialization(_) => "SerializationFailed",
            Self::UnknownResourceType(_) => "UnknownResourceType",
            Self::Config(_) => "InvalidConfiguration",
        }
    }

    /// Operator-facing hint, when one applies
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Api { status, .. } => status_hint(*status),
            Self::Auth(_) => Some(
                "Set DATABRICKS_ACCESS_TOKEN or sign in with 'az login' / a managed identity.",
            ),
            Self::Timeout { .. } => {
                Some("The cluster may still be converging. Re-run the deployment to resume.")
            },
            _ => None,
        }
    }
}

/// Short hint for common Databricks API status codes
pub fn status_hint(status: u16) -> Option<&'static str> {
    match status {
        400 => Some("Invalid request. Check the resource properties."),
        401 => Some("Authentication failed. The access token is missing or expired."),
        403 => Some("Permission denied. Check the identity's workspace permissions."),
        404 => Some("Resource not found."),
        409 => Some("Resource conflict. The resource may already exist or be in use."),
        429 => Some("Rate limit exceeded. Please try again later."),
        500..=599 => Some("Databricks service temporarily unavailable. Please try again."),
        _ => None,
    }
}
