//! Unity Catalog connection handler

use super::{non_empty, HandlerContext, ResourceHandler, ResourceRequest};
use crate::databricks::client::{self, encode};
use crate::error::{Error, Result};
use crate::models::{ProvisioningInfo, UnityConnection, UnityConnectionIdentifiers};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

const CONNECTIONS_PATH: &str = "2.1/unity-catalog/connections";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConnectionInfo {
    name: Option<String>,
    connection_type: Option<String>,
    comment: Option<String>,
    properties: Option<BTreeMap<String, String>>,
    read_only: Option<bool>,
    owner: Option<String>,
    connection_id: Option<String>,
    full_name: Option<String>,
    url: Option<String>,
    credential_type: Option<String>,
    metastore_id: Option<String>,
    created_at: Option<i64>,
    created_by: Option<String>,
    updated_at: Option<i64>,
    updated_by: Option<String>,
    provisioning_info: Option<ProvisioningInfo>,
    securable_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateConnection<'a> {
    name: &'a str,
    connection_type: &'a str,
    options: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "crate::models::is_false")]
    read_only: bool,
}

#[derive(Debug, Serialize)]
struct UpdateConnection<'a> {
    options: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner: Option<&'a str>,
}

/// Converged connection; options stay as requested since the service redacts secrets in them
fn from_remote(desired: UnityConnection, info: ConnectionInfo) -> UnityConnection {
    UnityConnection {
        name: info.name.unwrap_or(desired.name),
        connection_type: info.connection_type.unwrap_or(desired.connection_type),
        options: desired.options,
        properties: info.properties.or(desired.properties),
        comment: info.comment.or(desired.comment),
        read_only: info.read_only.unwrap_or(desired.read_only),
        owner: info.owner.or(desired.owner),
        connection_id: info.connection_id,
        full_name: info.full_name,
        url: info.url,
        credential_type: info.credential_type,
        metastore_id: info.metastore_id,
        created_at: info.created_at,
        created_by: info.created_by,
        updated_at: info.updated_at,
        updated_by: info.updated_by,
        provisioning_info: info.provisioning_info,
        securable_type: info.securable_type,
    }
}

pub struct UnityConnectionHandler {
    ctx: HandlerContext,
}

impl UnityConnectionHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ResourceHandler for UnityConnectionHandler {
    type Properties = UnityConnection;
    type Identifiers = UnityConnectionIdentifiers;

    const RESOURCE_TYPE: &'static str = "UnityConnection";

    async fn create_or_update(
        &self,
        request: ResourceRequest<UnityConnection>,
        cancel: &CancellationToken,
    ) -> Result<UnityConnection> {
        let connection = request.properties;
        if connection.name.trim().is_empty() {
            return Err(Error::validation("Name is required"));
        }
        if connection.connection_type.trim().is_empty() {
            return Err(Error::validation("ConnectionType is required"));
        }

        let client = self.ctx.client(&request.config, cancel).await?;
        let path = format!("{}/{}", CONNECTIONS_PATH, encode(&connection.name));

        let exists = match client::get::<ConnectionInfo>(client.as_ref(), &path, cancel).await {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };

        let info: ConnectionInfo = if exists {
            tracing::info!("Connection '{}' exists; updating", connection.name);
            let payload = UpdateConnection {
                options: &connection.options,
                owner: non_empty(&connection.owner),
            };
            client::patch(client.as_ref(), &path, &payload, cancel).await?
        } else {
            tracing::info!(
                "Connection '{}' does not exist; creating {} connection",
                connection.name,
                connection.connection_type
            );
            let payload = CreateConnection {
                name: &connection.name,
                connection_type: &connection.connection_type,
                options: &connection.options,
                comment: non_empty(&connection.comment),
                properties: connection.properties.as_ref(),
                read_only: connection.read_only,
            };
            client::post(client.as_ref(), CONNECTIONS_PATH, &payload, cancel).await?
        };

        Ok(from_remote(connection, info))
    }

    fn identifiers(properties: &UnityConnection) -> UnityConnectionIdentifiers {
        UnityConnectionIdentifiers {
            name: properties.name.clone(),
        }
    }
}
