//! Unity Catalog catalog handler

use super::{non_empty, HandlerContext, ResourceHandler, ResourceRequest};
use crate::databricks::client::{self, encode};
use crate::error::{Error, Result};
use crate::models::{Catalog, CatalogIdentifiers, ProvisioningInfo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

const CATALOGS_PATH: &str = "2.1/unity-catalog/catalogs";

fn catalog_path(name: &str) -> String {
    format!("{}/{}", CATALOGS_PATH, encode(name))
}

/// `catalogs/get` response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CatalogInfo {
    name: Option<String>,
    comment: Option<String>,
    storage_root: Option<String>,
    connection_name: Option<String>,
    provider_name: Option<String>,
    share_name: Option<String>,
    options: Option<BTreeMap<String, String>>,
    properties: Option<BTreeMap<String, String>>,
    enable_predictive_optimization: Option<String>,
    owner: Option<String>,
    metastore_id: Option<String>,
    created_at: Option<i64>,
    created_by: Option<String>,
    updated_at: Option<i64>,
    updated_by: Option<String>,
    catalog_type: Option<String>,
    storage_location: Option<String>,
    isolation_mode: Option<String>,
    full_name: Option<String>,
    securable_kind: Option<String>,
    securable_type: Option<String>,
    provisioning_info: Option<ProvisioningInfo>,
    browse_only: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CreateCatalog<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_root: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    share_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<&'a BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct UpdateCatalog<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_predictive_optimization: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<&'a BTreeMap<String, String>>,
}

/// At most one of the catalog source fields may be set
fn validate(catalog: &Catalog) -> Result<()> {
    if catalog.name.trim().is_empty() {
        return Err(Error::validation("Name is required"));
    }
    let sources = [
        ("storageRoot", &catalog.storage_root),
        ("providerName", &catalog.provider_name),
        ("shareName", &catalog.share_name),
        ("connectionName", &catalog.connection_name),
    ];
    let set: Vec<&str> = sources
        .iter()
        .filter(|(_, value)| non_empty(value).is_some())
        .map(|(field, _)| *field)
        .collect();
    if set.len() > 1 {
        return Err(Error::validation(format!(
            "Only one of storageRoot, providerName, shareName or connectionName can be specified (got {})",
            set.join(", ")
        )));
    }
    Ok(())
}

/// Build the converged catalog from the server's record
fn from_remote(desired: Catalog, info: CatalogInfo) -> Catalog {
    Catalog {
        name: info.name.unwrap_or(desired.name),
        comment: info.comment.or(desired.comment),
        storage_root: info.storage_root.or(desired.storage_root),
        connection_name: info.connection_name.or(desired.connection_name),
        provider_name: info.provider_name.or(desired.provider_name),
        share_name: info.share_name.or(desired.share_name),
        options: info.options.or(desired.options),
        properties: info.properties.or(desired.properties),
        enable_predictive_optimization: info
            .enable_predictive_optimization
            .or(desired.enable_predictive_optimization),
        owner: info.owner,
        metastore_id: info.metastore_id,
        created_at: info.created_at,
        created_by: info.created_by,
        updated_at: info.updated_at,
        updated_by: info.updated_by,
        catalog_type: info.catalog_type,
        storage_location: info.storage_location,
        isolation_mode: info.isolation_mode,
        full_name: info.full_name,
        securable_kind: info.securable_kind,
        securable_type: info.securable_type,
        provisioning_info: info.provisioning_info,
        browse_only: info.browse_only.unwrap_or(false),
    }
}

pub struct CatalogHandler {
    ctx: HandlerContext,
}

impl CatalogHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ResourceHandler for CatalogHandler {
    type Properties = Catalog;
    type Identifiers = CatalogIdentifiers;

    const RESOURCE_TYPE: &'static str = "Catalog";

    async fn create_or_update(
        &self,
        request: ResourceRequest<Catalog>,
        cancel: &CancellationToken,
    ) -> Result<Catalog> {
        let catalog = request.properties;
        validate(&catalog)?;
        let client = self.ctx.client(&request.config, cancel).await?;
        let path = catalog_path(&catalog.name);

        let existing = match client::get::<CatalogInfo>(client.as_ref(), &path, cancel).await {
            Ok(info) => Some(info),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let info: CatalogInfo = match existing {
            None => {
                tracing::info!("Catalog '{}' does not exist; creating", catalog.name);
                let payload = CreateCatalog {
                    name: &catalog.name,
                    comment: non_empty(&catalog.comment),
                    storage_root: non_empty(&catalog.storage_root),
                    provider_name: non_empty(&catalog.provider_name),
                    share_name: non_empty(&catalog.share_name),
                    connection_name: non_empty(&catalog.connection_name),
                    options: catalog.options.as_ref(),
                    properties: catalog.properties.as_ref(),
                };
                client::post(client.as_ref(), CATALOGS_PATH, &payload, cancel).await?
            },
            Some(_) => {
                tracing::info!("Catalog '{}' exists; updating", catalog.name);
                let payload = UpdateCatalog {
                    comment: catalog.comment.as_deref(),
                    enable_predictive_optimization: non_empty(
                        &catalog.enable_predictive_optimization,
                    ),
                    options: catalog.options.as_ref(),
                    properties: catalog.properties.as_ref(),
                };
                client::patch(client.as_ref(), &path, &payload, cancel).await?
            },
        };

        Ok(from_remote(catalog, info))
    }

    fn identifiers(properties: &Catalog) -> CatalogIdentifiers {
        CatalogIdentifiers {
            name: properties.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::handlers::testing::{FakeFactory, FakeWorkspace};
    use reqwest::Method;
    use serde_json::json;
    use std::sync::Arc;

    const GET_MAIN: &str = "2.1/unity-catalog/catalogs/main";

    fn handler(workspace: &Arc<FakeWorkspace>) -> CatalogHandler {
        CatalogHandler::new(HandlerContext::new(FakeFactory::shared(workspace.clone())))
    }

    fn request(catalog: Catalog) -> ResourceRequest<Catalog> {
        ResourceRequest::new(
            "Catalog",
            Configuration::new("https://adb-1.azuredatabricks.net"),
            catalog,
        )
    }

    fn main_catalog() -> Catalog {
        Catalog {
            name: "main".to_string(),
            comment: Some("analytics".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn conflicting_sources_fail_fast() {
        let workspace = FakeWorkspace::new();
        let catalog = Catalog {
            storage_root: Some("abfss://c@a.dfs.core.windows.net/".to_string()),
            share_name: Some("share".to_string()),
            ..main_catalog()
        };

        let err = handler(&workspace)
            .create_or_update(request(catalog), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(ref m) if m.contains("storageRoot, shareName")));
        assert!(workspace.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_catalog_is_created() {
        let workspace = FakeWorkspace::new();
        workspace.on(
            Method::POST,
            CATALOGS_PATH,
            200,
            json!({"name": "main", "full_name": "main", "catalog_type": "MANAGED_CATALOG"}),
        );

        let converged = handler(&workspace)
            .create_or_update(request(main_catalog()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            workspace.lines(),
            vec!["GET 2.1/unity-catalog/catalogs/main", "POST 2.1/unity-catalog/catalogs"]
        );
        assert_eq!(
            workspace.body_of(Method::POST, CATALOGS_PATH),
            Some(json!({"name": "main", "comment": "analytics"}))
        );
        assert_eq!(converged.catalog_type.as_deref(), Some("MANAGED_CATALOG"));
    }

    #[tokio::test]
    async fn existing_catalog_carries_server_fields_verbatim() {
        let workspace = FakeWorkspace::new();
        let remote = json!({
            "name": "main",
            "comment": "analytics",
            "full_name": "main",
            "owner": "data-platform@contoso.com",
            "created_at": 1718000000123_i64,
            "created_by": "admin@contoso.com",
            "metastore_id": "ms-1",
            "isolation_mode": "OPEN",
            "provisioning_info": {"state": "ACTIVE"},
            "browse_only": false
        });
        workspace
            .on(Method::GET, GET_MAIN, 200, remote.clone())
            .on(Method::PATCH, GET_MAIN, 200, remote);

        let converged = handler(&workspace)
            .create_or_update(request(main_catalog()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(workspace.count(Method::POST, CATALOGS_PATH), 0);
        assert_eq!(converged.full_name.as_deref(), Some("main"));
        assert_eq!(converged.owner.as_deref(), Some("data-platform@contoso.com"));
        assert_eq!(converged.created_at, Some(1718000000123));
        assert_eq!(converged.metastore_id.as_deref(), Some("ms-1"));
        assert_eq!(
            converged.provisioning_info.and_then(|p| p.state).as_deref(),
            Some("ACTIVE")
        );
        assert_eq!(
            workspace.body_of(Method::PATCH, GET_MAIN),
            Some(json!({"comment": "analytics"}))
        );
    }

    #[tokio::test]
    async fn lookup_errors_other_than_not_found_propagate() {
        let workspace = FakeWorkspace::new();
        workspace.on(Method::GET, GET_MAIN, 403, json!({"error_code": "PERMISSION_DENIED"}));

        let err = handler(&workspace)
            .create_or_update(request(main_catalog()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(403));
        assert_eq!(workspace.count(Method::POST, CATALOGS_PATH), 0);
    }
}
