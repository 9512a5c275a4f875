//! Resource handlers
//!
//! One handler per resource kind. Every handler turns a desired-state
//! request into a converged actual state; the shared pieces here give them a
//! workspace client, typed API calls and response construction.
//!
//! # Module Structure
//!
//! - [`cluster`] - clusters (the only handler that waits on remote state)
//! - [`catalog`], [`schema`], [`connection`], [`storage_credential`],
//!   [`external_location`] - Unity Catalog securables
//! - [`directory`], [`secret`], [`secret_scope`], [`repo`], [`git_credential`] -
//!   workspace objects

pub mod catalog;
pub mod cluster;
pub mod connection;
pub mod directory;
pub mod external_location;
pub mod git_credential;
pub mod repo;
pub mod schema;
pub mod secret;
pub mod secret_scope;
pub mod storage_credential;

#[cfg(test)]
pub(crate) mod testing;

use crate::config::Configuration;
use crate::databricks::client::{self, WorkspaceClient};
use crate::databricks::factory::ClientFactory;
use crate::databricks::http::ApiResponse;
use crate::databricks::poll::PollConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// API version reported for every resource type
pub const API_VERSION: &str = "1.0.0";

/// Desired state of one resource plus the workspace it lives in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest<P> {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub config: Configuration,
    #[serde(default)]
    pub properties: P,
}

impl<P> ResourceRequest<P> {
    pub fn new(resource_type: impl Into<String>, config: Configuration, properties: P) -> Self {
        Self {
            resource_type: resource_type.into(),
            config,
            properties,
        }
    }
}

/// Converged state handed back to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResponse {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub api_version: String,
    pub identifiers: Value,
    pub properties: Value,
}

impl ResourceResponse {
    /// Build the response for a handler's converged properties
    pub fn for_handler<H: ResourceHandler>(properties: &H::Properties) -> Result<Self> {
        Ok(Self {
            resource_type: H::RESOURCE_TYPE.to_string(),
            api_version: H::API_VERSION.to_string(),
            identifiers: serde_json::to_value(H::identifiers(properties))?,
            properties: serde_json::to_value(properties)?,
        })
    }
}

/// Reconciliation contract implemented by every resource kind
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    type Properties: Serialize + DeserializeOwned + Default + Send + Sync + 'static;
    type Identifiers: Serialize;

    /// Resource type name as declared to the host
    const RESOURCE_TYPE: &'static str;
    const API_VERSION: &'static str = API_VERSION;

    /// Drive the remote resource to the desired state and return its actual state
    async fn create_or_update(
        &self,
        request: ResourceRequest<Self::Properties>,
        cancel: &CancellationToken,
    ) -> Result<Self::Properties>;

    /// Identifier record for a set of properties
    fn identifiers(properties: &Self::Properties) -> Self::Identifiers;
}

/// Type-erased handler, dispatched by resource type name
#[async_trait]
pub trait DynResourceHandler: Send + Sync {
    fn resource_type(&self) -> &'static str;
    fn api_version(&self) -> &'static str;
    async fn handle(
        &self,
        request: ResourceRequest<Value>,
        cancel: &CancellationToken,
    ) -> Result<ResourceResponse>;
}

#[async_trait]
impl<H: ResourceHandler> DynResourceHandler for H {
    fn resource_type(&self) -> &'static str {
        H::RESOURCE_TYPE
    }

    fn api_version(&self) -> &'static str {
        H::API_VERSION
    }

    async fn handle(
        &self,
        request: ResourceRequest<Value>,
        cancel: &CancellationToken,
    ) -> Result<ResourceResponse> {
        request.config.validate()?;
        let properties: H::Properties =
            serde_json::from_value(request.properties).map_err(|e| {
                Error::validation(format!("invalid {} properties: {}", H::RESOURCE_TYPE, e))
            })?;
        let typed = ResourceRequest::new(request.resource_type, request.config, properties);

        let converged = self.create_or_update(typed, cancel).await?;
        ResourceResponse::for_handler::<H>(&converged)
    }
}

/// Shared services every handler uses to reach the workspace
#[derive(Clone)]
pub struct HandlerContext {
    factory: Arc<dyn ClientFactory>,
    timeout: Option<Duration>,
}

impl HandlerContext {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            timeout: None,
        }
    }

    /// Per-call timeout override; `None` uses the factory default
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the (cached) client for the request's workspace
    pub async fn client(
        &self,
        config: &Configuration,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn WorkspaceClient>> {
        self.factory
            .client(&config.workspace_url, self.timeout, cancel)
            .await
    }

    /// Issue one raw call through a fresh invoker; nulls are stripped from the payload
    pub async fn call_api(
        &self,
        config: &Configuration,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let stripped = payload.cloned().map(client::strip_nulls);
        self.factory
            .call_api(
                &config.workspace_url,
                method,
                path,
                stripped.as_ref(),
                self.timeout,
                cancel,
            )
            .await
    }

    /// Raw call, fail on non-success status, then deserialize the body
    pub async fn call_for_response<T: DeserializeOwned>(
        &self,
        config: &Configuration,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let response = self
            .call_api(config, method.clone(), path, payload, cancel)
            .await?;
        response.error_for_status(&method, path)?.json()
    }
}

/// All handlers, keyed by resource type name
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn DynResourceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every resource kind this extension serves
    pub fn standard(ctx: HandlerContext, cluster_poll: PollConfig) -> Self {
        let mut registry = Self::new();
        registry.register(cluster::ClusterHandler::new(ctx.clone(), cluster_poll));
        registry.register(catalog::CatalogHandler::new(ctx.clone()));
        registry.register(schema::UnitySchemaHandler::new(ctx.clone()));
        registry.register(connection::UnityConnectionHandler::new(ctx.clone()));
        registry.register(storage_credential::StorageCredentialHandler::new(ctx.clone()));
        registry.register(external_location::ExternalLocationHandler::new(ctx.clone()));
        registry.register(directory::DirectoryHandler::new(ctx.clone()));
        registry.register(secret::SecretHandler::new(ctx.clone()));
        registry.register(secret_scope::SecretScopeHandler::new(ctx.clone()));
        registry.register(repo::RepoHandler::new(ctx.clone()));
        registry.register(git_credential::GitCredentialHandler::new(ctx));
        registry
    }

    pub fn register<H: ResourceHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(H::RESOURCE_TYPE, Arc::new(handler));
    }

    pub fn get(&self, resource_type: &str) -> Option<&Arc<dyn DynResourceHandler>> {
        self.handlers.get(resource_type)
    }

    /// Registered resource type names, sorted
    pub fn resource_types(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    /// Route a request to its handler inside a per-request span
    pub async fn dispatch(
        &self,
        request: ResourceRequest<Value>,
        cancel: &CancellationToken,
    ) -> Result<ResourceResponse> {
        let handler = self
            .get(&request.resource_type)
            .ok_or_else(|| Error::UnknownResourceType(request.resource_type.clone()))?
            .clone();

        let span = tracing::info_span!(
            "request",
            request_id = %uuid::Uuid::new_v4(),
            resource_type = %request.resource_type,
        );

        async move {
            tracing::info!("Reconciling {}", handler.resource_type());
            let result = handler.handle(request, cancel).await;
            match &result {
                Ok(_) => tracing::info!("Reconciliation finished"),
                Err(e) => tracing::error!("Reconciliation failed: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Treat an empty string the same as a missing value
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
