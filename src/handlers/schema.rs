//! Unity Catalog schema handler
//!
//! Schemas are addressed by their full name `catalog.schema`.

use super::{non_empty, HandlerContext, ResourceHandler, ResourceRequest};
use crate::databricks::client::{self, encode};
use crate::error::{Error, Result};
use crate::models::{EffectivePredictiveOptimizationFlag, UnitySchema, UnitySchemaIdentifiers};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

const SCHEMAS_PATH: &str = "2.1/unity-catalog/schemas";

pub fn full_name(catalog_name: &str, name: &str) -> String {
    format!("{}.{}", catalog_name, name)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SchemaInfo {
    name: Option<String>,
    catalog_name: Option<String>,
    comment: Option<String>,
    properties: Option<BTreeMap<String, String>>,
    storage_root: Option<String>,
    enable_predictive_optimization: Option<String>,
    owner: Option<String>,
    schema_id: Option<String>,
    full_name: Option<String>,
    metastore_id: Option<String>,
    catalog_type: Option<String>,
    storage_location: Option<String>,
    created_at: Option<i64>,
    created_by: Option<String>,
    updated_at: Option<i64>,
    updated_by: Option<String>,
    effective_predictive_optimization_flag: Option<WireEffectiveFlag>,
    browse_only: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct WireEffectiveFlag {
    value: Option<String>,
    inherited_from_name: Option<String>,
    inherited_from_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateSchema<'a> {
    name: &'a str,
    catalog_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_root: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct UpdateSchema<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_predictive_optimization: Option<&'a str>,
}

impl<'a> UpdateSchema<'a> {
    fn from_desired(schema: &'a UnitySchema) -> Self {
        Self {
            comment: schema.comment.as_deref(),
            owner: non_empty(&schema.owner),
            properties: schema.properties.as_ref(),
            enable_predictive_optimization: non_empty(&schema.enable_predictive_optimization),
        }
    }

    fn is_empty(&self) -> bool {
        self.comment.is_none()
            && self.owner.is_none()
            && self.properties.is_none()
            && self.enable_predictive_optimization.is_none()
    }
}

fn from_remote(desired: UnitySchema, info: SchemaInfo) -> UnitySchema {
    UnitySchema {
        catalog_name: info.catalog_name.unwrap_or(desired.catalog_name),
        name: info.name.unwrap_or(desired.name),
        comment: info.comment.or(desired.comment),
        properties: info.properties.or(desired.properties),
        storage_root: info.storage_root.or(desired.storage_root),
        enable_predictive_optimization: info
            .enable_predictive_optimization
            .or(desired.enable_predictive_optimization),
        owner: info.owner.or(desired.owner),
        schema_id: info.schema_id,
        full_name: info.full_name,
        metastore_id: info.metastore_id,
        catalog_type: info.catalog_type,
        storage_location: info.storage_location,
        created_at: info.created_at,
        created_by: info.created_by,
        updated_at: info.updated_at,
        updated_by: info.updated_by,
        effective_predictive_optimization_flag: info.effective_predictive_optimization_flag.map(
            |flag| EffectivePredictiveOptimizationFlag {
                value: flag.value,
                inherited_from_name: flag.inherited_from_name,
                inherited_from_type: flag.inherited_from_type,
            },
        ),
        browse_only: info.browse_only.unwrap_or(false),
    }
}

pub struct UnitySchemaHandler {
    ctx: HandlerContext,
}

impl UnitySchemaHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ResourceHandler for UnitySchemaHandler {
    type Properties = UnitySchema;
    type Identifiers = UnitySchemaIdentifiers;

    const RESOURCE_TYPE: &'static str = "UnitySchema";

    async fn create_or_update(
        &self,
        request: ResourceRequest<UnitySchema>,
        cancel: &CancellationToken,
    ) -> Result<UnitySchema> {
        let schema = request.properties;
        if schema.catalog_name.trim().is_empty() {
            return Err(Error::validation("CatalogName is required"));
        }
        if schema.name.trim().is_empty() {
            return Err(Error::validation("Name is required"));
        }

        let client = self.ctx.client(&request.config, cancel).await?;
        let full = full_name(&schema.catalog_name, &schema.name);
        let path = format!("{}/{}", SCHEMAS_PATH, encode(&full));

        let existing = match client::get::<SchemaInfo>(client.as_ref(), &path, cancel).await {
            Ok(info) => Some(info),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let info = match existing {
            None => {
                tracing::info!("Schema '{}' does not exist; creating", full);
                let payload = CreateSchema {
                    name: &schema.name,
                    catalog_name: &schema.catalog_name,
                    comment: non_empty(&schema.comment),
                    properties: schema.properties.as_ref(),
                    storage_root: non_empty(&schema.storage_root),
                };
                let created: SchemaInfo =
                    client::post(client.as_ref(), SCHEMAS_PATH, &payload, cancel).await?;

                // owner and predictive optimization are only settable by update
                let update = UpdateSchema {
                    comment: None,
                    properties: None,
                    ..UpdateSchema::from_desired(&schema)
                };
                if update.is_empty() {
                    created
                } else {
                    client::patch(client.as_ref(), &path, &update, cancel).await?
                }
            },
            Some(current) => {
                let update = UpdateSchema::from_desired(&schema);
                if update.is_empty() {
                    tracing::info!("Schema '{}' exists; nothing to update", full);
                    current
                } else {
                    tracing::info!("Schema '{}' exists; updating", full);
                    client::patch(client.as_ref(), &path, &update, cancel).await?
                }
            },
        };

        Ok(from_remote(schema, info))
    }

    fn identifiers(properties: &UnitySchema) -> UnitySchemaIdentifiers {
        UnitySchemaIdentifiers {
            catalog_name: properties.catalog_name.clone(),
            name: properties.name.clone(),
        }
    }
}
