//! Unity Catalog storage credential handler
//!
//! A credential authenticates either with an access connector's managed
//! identity or with a service principal; exactly one must be given.

use super::{non_empty, HandlerContext, ResourceHandler, ResourceRequest};
use crate::databricks::client::{self, encode};
use crate::error::{Error, Result};
use crate::models::{
    AzureManagedIdentity, AzureServicePrincipal, StorageCredential, StorageCredentialIdentifiers,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const CREDENTIALS_PATH: &str = "2.1/unity-catalog/storage-credentials";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CredentialInfo {
    id: Option<String>,
    name: Option<String>,
    comment: Option<String>,
    read_only: Option<bool>,
    owner: Option<String>,
    metastore_id: Option<String>,
    full_name: Option<String>,
    created_at: Option<i64>,
    created_by: Option<String>,
    updated_at: Option<i64>,
    updated_by: Option<String>,
    isolation_mode: Option<String>,
    used_for_managed_storage: Option<bool>,
    azure_managed_identity: Option<WireManagedIdentityInfo>,
    azure_service_principal: Option<WireServicePrincipalInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct WireManagedIdentityInfo {
    access_connector_id: Option<String>,
    managed_identity_id: Option<String>,
    credential_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct WireServicePrincipalInfo {
    directory_id: Option<String>,
    application_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireManagedIdentity<'a> {
    access_connector_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    managed_identity_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WireServicePrincipal<'a> {
    directory_id: &'a str,
    application_id: &'a str,
    client_secret: &'a str,
}

impl<'a> From<&'a AzureServicePrincipal> for WireServicePrincipal<'a> {
    fn from(sp: &'a AzureServicePrincipal) -> Self {
        Self {
            directory_id: &sp.directory_id,
            application_id: &sp.application_id,
            client_secret: &sp.client_secret,
        }
    }
}

#[derive(Debug, Serialize)]
struct CredentialPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    read_only: bool,
    #[serde(skip_serializing_if = "crate::models::is_false")]
    skip_validation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    azure_managed_identity: Option<WireManagedIdentity<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    azure_service_principal: Option<WireServicePrincipal<'a>>,
}

/// The configured authentication method
enum Auth<'a> {
    ManagedIdentity(&'a AzureManagedIdentity),
    ServicePrincipal(&'a AzureServicePrincipal),
}

fn require(value: &str, field: &str, method: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!(
            "{} is required when using {} authentication",
            field, method
        )));
    }
    Ok(())
}

fn validate(credential: &StorageCredential) -> Result<Auth<'_>> {
    if credential.name.trim().is_empty() {
        return Err(Error::validation("Name is required"));
    }
    match (
        &credential.azure_managed_identity,
        &credential.azure_service_principal,
    ) {
        (Some(mi), None) => {
            require(&mi.access_connector_id, "AccessConnectorId", "AzureManagedIdentity")?;
            Ok(Auth::ManagedIdentity(mi))
        },
        (None, Some(sp)) => {
            require(&sp.application_id, "ApplicationId", "AzureServicePrincipal")?;
            require(&sp.client_secret, "ClientSecret", "AzureServicePrincipal")?;
            require(&sp.directory_id, "DirectoryId", "AzureServicePrincipal")?;
            Ok(Auth::ServicePrincipal(sp))
        },
        (Some(_), Some(_)) => Err(Error::validation(
            "Only one of AzureManagedIdentity or AzureServicePrincipal can be specified",
        )),
        (None, None) => Err(Error::validation(
            "Either AzureManagedIdentity or AzureServicePrincipal must be specified for authentication",
        )),
    }
}

/// Converged credential; the client secret is never echoed back
fn from_remote(mut desired: StorageCredential, info: CredentialInfo) -> StorageCredential {
    if let Some(sp) = desired.azure_service_principal.as_mut() {
        sp.client_secret.clear();
        if let Some(remote) = info.azure_service_principal {
            if let Some(application_id) = remote.application_id {
                sp.application_id = application_id;
            }
            if let Some(directory_id) = remote.directory_id {
                sp.directory_id = directory_id;
            }
        }
    }
    if let (Some(mi), Some(remote)) = (
        desired.azure_managed_identity.as_mut(),
        info.azure_managed_identity,
    ) {
        if let Some(connector) = remote.access_connector_id {
            mi.access_connector_id = connector;
        }
        mi.managed_identity_id = remote.managed_identity_id.or(mi.managed_identity_id.take());
        mi.credential_id = remote.credential_id;
    }

    StorageCredential {
        name: info.name.unwrap_or(desired.name),
        comment: info.comment.or(desired.comment),
        read_only: info.read_only.unwrap_or(desired.read_only),
        skip_validation: desired.skip_validation,
        azure_managed_identity: desired.azure_managed_identity,
        azure_service_principal: desired.azure_service_principal,
        id: info.id,
        owner: info.owner,
        metastore_id: info.metastore_id,
        full_name: info.full_name,
        created_at: info.created_at,
        created_by: info.created_by,
        updated_at: info.updated_at,
        updated_by: info.updated_by,
        isolation_mode: info.isolation_mode,
        used_for_managed_storage: info.used_for_managed_storage.unwrap_or(false),
    }
}

pub struct StorageCredentialHandler {
    ctx: HandlerContext,
}

impl StorageCredentialHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ResourceHandler for StorageCredentialHandler {
    type Properties = StorageCredential;
    type Identifiers = StorageCredentialIdentifiers;

    const RESOURCE_TYPE: &'static str = "StorageCredential";

    async fn create_or_update(
        &self,
        request: ResourceRequest<StorageCredential>,
        cancel: &CancellationToken,
    ) -> Result<StorageCredential> {
        let credential = request.properties;
        let auth = validate(&credential)?;

        let client = self.ctx.client(&request.config, cancel).await?;
        let path = format!("{}/{}", CREDENTIALS_PATH, encode(&credential.name));

        let exists = match client::get::<CredentialInfo>(client.as_ref(), &path, cancel).await {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };

        let info: CredentialInfo = if exists {
            tracing::info!("Storage credential '{}' exists; updating", credential.name);
            // only the service principal block is re-applied on update
            let payload = CredentialPayload {
                name: None,
                comment: credential.comment.as_deref(),
                read_only: credential.read_only,
                skip_validation: credential.skip_validation,
                azure_managed_identity: None,
                azure_service_principal: match auth {
                    Auth::ServicePrincipal(sp) => Some(sp.into()),
                    Auth::ManagedIdentity(_) => None,
                },
            };
            client::patch(client.as_ref(), &path, &payload, cancel).await?
        } else {
            let payload = match auth {
                Auth::ManagedIdentity(mi) => {
                    tracing::info!(
                        "Creating storage credential '{}' with managed identity of {}",
                        credential.name,
                        mi.access_connector_id
                    );
                    CredentialPayload {
                        name: Some(&credential.name),
                        comment: non_empty(&credential.comment),
                        read_only: credential.read_only,
                        skip_validation: credential.skip_validation,
                        azure_managed_identity: Some(WireManagedIdentity {
                            access_connector_id: &mi.access_connector_id,
                            managed_identity_id: non_empty(&mi.managed_identity_id),
                        }),
                        azure_service_principal: None,
                    }
                },
                Auth::ServicePrincipal(sp) => {
                    tracing::info!(
                        "Creating storage credential '{}' with service principal {}",
                        credential.name,
                        sp.application_id
                    );
                    CredentialPayload {
                        name: Some(&credential.name),
                        comment: non_empty(&credential.comment),
                        read_only: credential.read_only,
                        skip_validation: credential.skip_validation,
                        azure_managed_identity: None,
                        azure_service_principal: Some(sp.into()),
                    }
                },
            };
            client::post(client.as_ref(), CREDENTIALS_PATH, &payload, cancel).await?
        };

        Ok(from_remote(credential, info))
    }

    fn identifiers(properties: &StorageCredential) -> StorageCredentialIdentifiers {
        StorageCredentialIdentifiers {
            name: properties.name.clone(),
        }
    }
}
