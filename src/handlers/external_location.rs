//! Unity Catalog external location handler

use super::{non_empty, HandlerContext, ResourceHandler, ResourceRequest};
use crate::databricks::client::{self, encode};
use crate::error::{Error, Result};
use crate::models::{ExternalLocation, ExternalLocationIdentifiers};
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const LOCATIONS_PATH: &str = "2.1/unity-catalog/external-locations";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct LocationInfo {
    name: Option<String>,
    url: Option<String>,
    credential_name: Option<String>,
    comment: Option<String>,
    read_only: Option<bool>,
    fallback: Option<bool>,
    owner: Option<String>,
    metastore_id: Option<String>,
    credential_id: Option<String>,
    created_at: Option<i64>,
    created_by: Option<String>,
    updated_at: Option<i64>,
    updated_by: Option<String>,
    browse_only: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CreateLocation<'a> {
    name: &'a str,
    url: &'a str,
    credential_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    read_only: bool,
    fallback: bool,
    skip_validation: bool,
}

/// Sent as a raw call; unset fields serialize as null and are stripped before sending
#[derive(Debug, Serialize)]
struct UpdateLocation<'a> {
    url: &'a str,
    credential_name: &'a str,
    comment: Option<&'a str>,
    read_only: bool,
    fallback: bool,
    skip_validation: bool,
}

fn validate(location: &ExternalLocation) -> Result<()> {
    if location.name.trim().is_empty() {
        return Err(Error::validation("Name is required"));
    }
    if location.url.trim().is_empty() {
        return Err(Error::validation("Url is required"));
    }
    if location.credential_name.trim().is_empty() {
        return Err(Error::validation("CredentialName is required"));
    }
    Ok(())
}

fn from_remote(desired: ExternalLocation, info: LocationInfo) -> ExternalLocation {
    ExternalLocation {
        name: info.name.unwrap_or(desired.name),
        url: info.url.unwrap_or(desired.url),
        credential_name: info.credential_name.unwrap_or(desired.credential_name),
        comment: info.comment.or(desired.comment),
        read_only: info.read_only.unwrap_or(desired.read_only),
        fallback: info.fallback.unwrap_or(desired.fallback),
        skip_validation: desired.skip_validation,
        owner: info.owner,
        metastore_id: info.metastore_id,
        credential_id: info.credential_id,
        created_at: info.created_at,
        created_by: info.created_by,
        updated_at: info.updated_at,
        updated_by: info.updated_by,
        browse_only: info.browse_only.unwrap_or(false),
    }
}

pub struct ExternalLocationHandler {
    ctx: HandlerContext,
}

impl ExternalLocationHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ResourceHandler for ExternalLocationHandler {
    type Properties = ExternalLocation;
    type Identifiers = ExternalLocationIdentifiers;

    const RESOURCE_TYPE: &'static str = "ExternalLocation";

    async fn create_or_update(
        &self,
        request: ResourceRequest<ExternalLocation>,
        cancel: &CancellationToken,
    ) -> Result<ExternalLocation> {
        let location = request.properties;
        validate(&location)?;

        let client = self.ctx.client(&request.config, cancel).await?;
        let path = format!("{}/{}", LOCATIONS_PATH, encode(&location.name));

        let existing = match client::get::<LocationInfo>(client.as_ref(), &path, cancel).await {
            Ok(info) => Some(info),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let info = match existing {
            None => {
                tracing::info!(
                    "External location '{}' does not exist; creating at {}",
                    location.name,
                    location.url
                );
                let payload = CreateLocation {
                    name: &location.name,
                    url: &location.url,
                    credential_name: &location.credential_name,
                    comment: non_empty(&location.comment),
                    read_only: location.read_only,
                    fallback: location.fallback,
                    skip_validation: location.skip_validation,
                };
                client::post(client.as_ref(), LOCATIONS_PATH, &payload, cancel).await?
            },
            Some(_) => {
                tracing::info!("External location '{}' exists; updating", location.name);
                let payload = serde_json::to_value(UpdateLocation {
                    url: &location.url,
                    credential_name: &location.credential_name,
                    comment: location.comment.as_deref(),
                    read_only: location.read_only,
                    fallback: location.fallback,
                    skip_validation: location.skip_validation,
                })?;
                let _: serde_json::Value = self
                    .ctx
                    .call_for_response(&request.config, Method::PATCH, &path, Some(&payload), cancel)
                    .await?;
                client::get::<LocationInfo>(client.as_ref(), &path, cancel).await?
            },
        };

        Ok(from_remote(location, info))
    }

    fn identifiers(properties: &ExternalLocation) -> ExternalLocationIdentifiers {
        ExternalLocationIdentifiers {
            name: properties.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::handlers::testing::{FakeFactory, FakeWorkspace};
    use serde_json::json;
    use std::sync::Arc;

    const LANDING: &str = "2.1/unity-catalog/external-locations/landing";
    const URL: &str = "abfss://landing@contoso.dfs.core.windows.net/";

    fn handler(workspace: &Arc<FakeWorkspace>) -> ExternalLocationHandler {
        ExternalLocationHandler::new(HandlerContext::new(FakeFactory::shared(workspace.clone())))
    }

    fn request(location: ExternalLocation) -> ResourceRequest<ExternalLocation> {
        ResourceRequest::new(
            "ExternalLocation",
            Configuration::new("https://adb-1.azuredatabricks.net"),
            location,
        )
    }

    fn landing() -> ExternalLocation {
        ExternalLocation {
            name: "landing".to_string(),
            url: URL.to_string(),
            credential_name: "lake".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_location_is_created() {
        let workspace = FakeWorkspace::new();
        workspace.on(
            Method::POST,
            LOCATIONS_PATH,
            200,
            json!({"name": "landing", "url": URL, "credential_name": "lake", "credential_id": "cred-1"}),
        );

        let converged = handler(&workspace)
            .create_or_update(request(landing()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            workspace.body_of(Method::POST, LOCATIONS_PATH),
            Some(json!({
                "name": "landing",
                "url": URL,
                "credential_name": "lake",
                "read_only": false,
                "fallback": false,
                "skip_validation": false
            }))
        );
        assert_eq!(converged.credential_id.as_deref(), Some("cred-1"));
    }

    #[tokio::test]
    async fn existing_location_is_patched_without_nulls_then_reread() {
        let workspace = FakeWorkspace::new();
        workspace
            .on(Method::GET, LANDING, 200, json!({"name": "landing", "url": "abfss://old@contoso.dfs.core.windows.net/"}))
            .on(
                Method::GET,
                LANDING,
                200,
                json!({"name": "landing", "url": URL, "credential_name": "lake", "owner": "ops"}),
            )
            .on(Method::PATCH, LANDING, 200, json!({}));

        let converged = handler(&workspace)
            .create_or_update(request(landing()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            workspace.lines(),
            vec![
                format!("GET {}", LANDING),
                format!("PATCH {}", LANDING),
                format!("GET {}", LANDING)
            ]
        );
        let body = workspace.body_of(Method::PATCH, LANDING).unwrap();
        assert!(body.get("comment").is_none());
        assert_eq!(body["url"], URL);
        assert_eq!(converged.url, URL);
        assert_eq!(converged.owner.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn credential_name_is_required() {
        let workspace = FakeWorkspace::new();
        let location = ExternalLocation {
            credential_name: " ".to_string(),
            ..landing()
        };
        let err = handler(&workspace)
            .create_or_update(request(location), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("CredentialName")));
        assert!(workspace.calls().is_empty());
    }
}
