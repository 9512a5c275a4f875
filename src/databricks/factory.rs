//! Client Factory
//!
//! Hands out one cached client per (workspace URL, timeout) pair and offers a
//! raw call path that builds a fresh HTTP invoker for every call.

use super::auth::TokenSource;
use super::client::{api_url, normalize_workspace_url, DatabricksClient, WorkspaceClient};
use super::http::{ApiResponse, DatabricksHttpClient};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Produces workspace clients for the handlers
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Get (or create) the client for a workspace
    async fn client(
        &self,
        workspace_url: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn WorkspaceClient>>;

    /// Issue a single call through a fresh HTTP invoker
    async fn call_api(
        &self,
        workspace_url: &str,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse>;
}

/// Cache key: lower-cased normalized URL and effective timeout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    url: String,
    timeout: Duration,
}

/// Production factory backed by an append-only client cache
///
/// Tokens are resolved once per cached client and never refreshed.
pub struct DatabricksClientFactory {
    tokens: Arc<dyn TokenSource>,
    default_timeout: Duration,
    clients: DashMap<ClientKey, Arc<OnceCell<Arc<DatabricksClient>>>>,
}

impl DatabricksClientFactory {
    pub fn new(tokens: Arc<dyn TokenSource>, default_timeout: Duration) -> Self {
        Self {
            tokens,
            default_timeout,
            clients: DashMap::new(),
        }
    }

    /// Number of cached clients
    pub fn cached_clients(&self) -> usize {
        self.clients
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    fn key(&self, workspace_url: &str, timeout: Option<Duration>) -> ClientKey {
        ClientKey {
            url: normalize_workspace_url(workspace_url).to_lowercase(),
            timeout: timeout.unwrap_or(self.default_timeout),
        }
    }
}

#[async_trait]
impl ClientFactory for DatabricksClientFactory {
    async fn client(
        &self,
        workspace_url: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn WorkspaceClient>> {
        let key = self.key(workspace_url, timeout);
        let cell = self
            .clients
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(existing) = cell.get() {
            tracing::info!(
                "Reusing client for {} (timeout {}s)",
                key.url,
                key.timeout.as_secs()
            );
            return Ok(existing.clone() as Arc<dyn WorkspaceClient>);
        }

        let client = cell
            .get_or_try_init(|| async {
                let token = self.tokens.token(cancel).await?;
                tracing::info!(
                    "Creating client for {} (timeout {}s)",
                    key.url,
                    key.timeout.as_secs()
                );
                DatabricksClient::new(workspace_url, token, key.timeout).map(Arc::new)
            })
            .await?;

        Ok(client.clone() as Arc<dyn WorkspaceClient>)
    }

    async fn call_api(
        &self,
        workspace_url: &str,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse> {
        let base_url = normalize_workspace_url(workspace_url);
        let timeout = timeout.unwrap_or(self.default_timeout);
        let token = self.tokens.token(cancel).await?;

        tracing::debug!(
            "Raw Databricks API request {} {} (timeout {}s)",
            method,
            path,
            timeout.as_secs()
        );
        let http = DatabricksHttpClient::new(timeout)?;
        let response = http
            .send(method, &api_url(&base_url, path), &token, payload, cancel)
            .await?;
        tracing::debug!("Raw Databricks API response {} for {}", response.status, path);
        Ok(response)
    }
}
