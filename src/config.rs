//! Configuration Management
//!
//! Process-wide settings for the extension and the per-request workspace
//! configuration supplied by the host.

use crate::databricks::poll::PollConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable consulted for an explicit access token
pub const DEFAULT_TOKEN_ENV_VAR: &str = "DATABRICKS_ACCESS_TOKEN";

/// Workspace connection parameters sent with every resource request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Azure Databricks workspace URL, e.g. `https://adb-123.4.azuredatabricks.net`
    pub workspace_url: String,
}

impl Configuration {
    pub fn new(workspace_url: impl Into<String>) -> Self {
        Self {
            workspace_url: workspace_url.into(),
        }
    }

    /// Check the workspace URL is an absolute http(s) URL
    pub fn validate(&self) -> Result<()> {
        if self.workspace_url.trim().is_empty() {
            return Err(Error::config("workspaceUrl is required"));
        }
        let parsed = url::Url::parse(&self.workspace_url)
            .map_err(|e| Error::config(format!("workspaceUrl is not a valid URL: {}", e)))?;
        match parsed.scheme() {
            "https" | "http" => Ok(()),
            other => Err(Error::config(format!(
                "workspaceUrl must use http or https, got '{}'",
                other
            ))),
        }
    }
}

/// Extension settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Timeout applied to every HTTP call
    pub http_timeout_secs: u64,
    /// Delay between cluster state polls
    pub cluster_poll_interval_secs: u64,
    /// Maximum number of cluster state polls
    pub cluster_poll_max_attempts: u32,
    /// Environment variable holding an explicit access token
    pub token_env_var: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_timeout_secs: 30,
            cluster_poll_interval_secs: 30,
            cluster_poll_max_attempts: 60,
            token_env_var: DEFAULT_TOKEN_ENV_VAR.to_string(),
        }
    }
}

impl Settings {
    /// Get the settings file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("databricks-extension").join("config.json"))
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_json(&content),
            Err(e) => {
                tracing::warn!("Could not read settings file {:?}: {}", path, e);
                Self::default()
            },
        }
    }

    /// Parse settings JSON; missing fields take their defaults
    pub fn from_json(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring invalid settings file: {}", e);
            Self::default()
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn cluster_poll_interval(&self) -> Duration {
        Duration::from_secs(self.cluster_poll_interval_secs)
    }

    /// Polling budget for cluster state waits
    pub fn cluster_poll(&self) -> PollConfig {
        PollConfig::new(self.cluster_poll_interval(), self.cluster_poll_max_attempts)
    }
}
