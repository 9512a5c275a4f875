//! Secret scope handler
//!
//! Scopes cannot be updated; an existing scope is reported as-is.

use super::{non_empty, HandlerContext, ResourceHandler, ResourceRequest};
use crate::databricks::client;
use crate::error::{Error, Result};
use crate::models::{AzureKeyVaultMetadata, SecretScope, SecretScopeIdentifiers};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const LIST_PATH: &str = "2.0/secrets/scopes/list";
const CREATE_PATH: &str = "2.0/secrets/scopes/create";

const DATABRICKS_BACKEND: &str = "DATABRICKS";
const KEY_VAULT_BACKEND: &str = "AZURE_KEYVAULT";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScopeList {
    scopes: Vec<ScopeInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScopeInfo {
    name: String,
    backend_type: Option<String>,
    keyvault_metadata: Option<WireKeyVault>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireKeyVault {
    resource_id: String,
    dns_name: String,
}

#[derive(Serialize)]
struct CreateScope<'a> {
    scope: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    initial_manage_principal: Option<&'a str>,
    scope_backend_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend_azure_keyvault: Option<BackendKeyVault<'a>>,
}

#[derive(Serialize)]
struct BackendKeyVault<'a> {
    resource_id: &'a str,
    dns_name: &'a str,
}

fn validate(scope: &SecretScope) -> Result<()> {
    if scope.scope_name.trim().is_empty() {
        return Err(Error::validation("ScopeName is required"));
    }
    if let Some(vault) = &scope.key_vault_metadata {
        if vault.resource_id.trim().is_empty() || vault.dns_name.trim().is_empty() {
            return Err(Error::validation(
                "ResourceId and DnsName are required for an Azure Key Vault backed scope",
            ));
        }
    }
    Ok(())
}

pub struct SecretScopeHandler {
    ctx: HandlerContext,
}

impl SecretScopeHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ResourceHandler for SecretScopeHandler {
    type Properties = SecretScope;
    type Identifiers = SecretScopeIdentifiers;

    const RESOURCE_TYPE: &'static str = "SecretScope";

    async fn create_or_update(
        &self,
        request: ResourceRequest<SecretScope>,
        cancel: &CancellationToken,
    ) -> Result<SecretScope> {
        let scope = request.properties;
        validate(&scope)?;

        let client = self.ctx.client(&request.config, cancel).await?;
        let listed: ScopeList = client::get(client.as_ref(), LIST_PATH, cancel).await?;

        if let Some(existing) = listed
            .scopes
            .into_iter()
            .find(|s| s.name == scope.scope_name)
        {
            tracing::info!(
                "Secret scope '{}' exists; scopes cannot be updated",
                scope.scope_name
            );
            return Ok(SecretScope {
                key_vault_metadata: existing
                    .keyvault_metadata
                    .map(|kv| AzureKeyVaultMetadata {
                        resource_id: kv.resource_id,
                        dns_name: kv.dns_name,
                    })
                    .or(scope.key_vault_metadata),
                backend_type: existing.backend_type,
                ..scope
            });
        }

        let backend = if scope.key_vault_metadata.is_some() {
            KEY_VAULT_BACKEND
        } else {
            DATABRICKS_BACKEND
        };
        tracing::info!(
            "Creating {} secret scope '{}'",
            backend,
            scope.scope_name
        );
        let payload = CreateScope {
            scope: &scope.scope_name,
            initial_manage_principal: non_empty(&scope.initial_manage_principal),
            scope_backend_type: backend,
            backend_azure_keyvault: scope.key_vault_metadata.as_ref().map(|kv| BackendKeyVault {
                resource_id: &kv.resource_id,
                dns_name: &kv.dns_name,
            }),
        };
        let _: serde_json::Value = client::post(client.as_ref(), CREATE_PATH, &payload, cancel).await?;

        Ok(SecretScope {
            backend_type: Some(backend.to_string()),
            ..scope
        })
    }

    fn identifiers(properties: &SecretScope) -> SecretScopeIdentifiers {
        SecretScopeIdentifiers {
            scope_name: properties.scope_name.clone(),
        }
    }
}
