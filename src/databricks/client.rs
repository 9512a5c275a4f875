//! Databricks Client
//!
//! Workspace-scoped client handle combining a resolved token with the HTTP
//! layer, plus typed call helpers shared by every resource handler.

use super::http::{ApiResponse, DatabricksHttpClient};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A live connection to one Databricks workspace
///
/// Paths are relative to the workspace `api/` root, e.g. `2.1/clusters/list`.
#[async_trait]
pub trait WorkspaceClient: Send + Sync {
    /// Normalized workspace base URL
    fn base_url(&self) -> &str;

    /// Issue one API call and return the raw response
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse>;
}

/// Strip the trailing slash from a workspace URL
pub fn normalize_workspace_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Build the absolute URL of an API path
pub fn api_url(base_url: &str, path: &str) -> String {
    format!("{}/api/{}", base_url, path.trim_start_matches('/'))
}

/// Main Databricks client
#[derive(Clone)]
pub struct DatabricksClient {
    base_url: String,
    token: String,
    timeout: Duration,
    http: DatabricksHttpClient,
}

impl DatabricksClient {
    /// Create a client for a workspace with an already-resolved token
    pub fn new(workspace_url: &str, token: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: normalize_workspace_url(workspace_url),
            token,
            timeout,
            http: DatabricksHttpClient::new(timeout)?,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for DatabricksClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabricksClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl WorkspaceClient for DatabricksClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse> {
        let url = api_url(&self.base_url, path);
        self.http.send(method, &url, &self.token, body, cancel).await
    }
}

/// Call an endpoint, fail on non-success status, and deserialize the body
pub async fn call_for_response<T: DeserializeOwned>(
    client: &dyn WorkspaceClient,
    method: Method,
    path: &str,
    body: Option<&Value>,
    cancel: &CancellationToken,
) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(crate::error::Error::Cancelled);
    }
    let response = client.send(method.clone(), path, body, cancel).await?;
    response.error_for_status(&method, path)?.json()
}

/// GET a path and deserialize the response
pub async fn get<T: DeserializeOwned>(
    client: &dyn WorkspaceClient,
    path: &str,
    cancel: &CancellationToken,
) -> Result<T> {
    call_for_response(client, Method::GET, path, None, cancel).await
}

/// POST a serializable payload and deserialize the response
pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
    client: &dyn WorkspaceClient,
    path: &str,
    payload: &B,
    cancel: &CancellationToken,
) -> Result<T> {
    let body = serde_json::to_value(payload)?;
    call_for_response(client, Method::POST, path, Some(&body), cancel).await
}

/// PATCH a serializable payload and deserialize the response
pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
    client: &dyn WorkspaceClient,
    path: &str,
    payload: &B,
    cancel: &CancellationToken,
) -> Result<T> {
    let body = serde_json::to_value(payload)?;
    call_for_response(client, Method::PATCH, path, Some(&body), cancel).await
}

/// Remove null-valued fields from a JSON object payload
pub fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Percent-encode one path segment or query value
pub fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
