//! Workspace directory handler

use super::{HandlerContext, ResourceHandler, ResourceRequest};
use crate::databricks::client::{self, encode};
use crate::error::{Error, Result};
use crate::models::{Directory, DirectoryIdentifiers};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const MKDIRS_PATH: &str = "2.0/workspace/mkdirs";

fn status_path(path: &str) -> String {
    format!("2.0/workspace/get-status?path={}", encode(path))
}

#[derive(Debug, Serialize)]
struct Mkdirs<'a> {
    path: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ObjectInfo {
    path: Option<String>,
    object_type: Option<String>,
    object_id: Option<i64>,
    size: Option<i64>,
}

pub struct DirectoryHandler {
    ctx: HandlerContext,
}

impl DirectoryHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ResourceHandler for DirectoryHandler {
    type Properties = Directory;
    type Identifiers = DirectoryIdentifiers;

    const RESOURCE_TYPE: &'static str = "Directory";

    async fn create_or_update(
        &self,
        request: ResourceRequest<Directory>,
        cancel: &CancellationToken,
    ) -> Result<Directory> {
        let directory = request.properties;
        if !directory.path.starts_with('/') {
            return Err(Error::validation(format!(
                "Path must be an absolute workspace path (got '{}')",
                directory.path
            )));
        }

        let client = self.ctx.client(&request.config, cancel).await?;

        // mkdirs succeeds when the directory already exists
        tracing::info!("Ensuring directory exists at path '{}'", directory.path);
        let _: serde_json::Value = client::post(
            client.as_ref(),
            MKDIRS_PATH,
            &Mkdirs {
                path: &directory.path,
            },
            cancel,
        )
        .await?;

        let info: ObjectInfo =
            client::get(client.as_ref(), &status_path(&directory.path), cancel).await?;

        Ok(Directory {
            path: info.path.unwrap_or(directory.path),
            object_type: info.object_type,
            object_id: info.object_id,
            size: Some(info.size.unwrap_or(0)),
        })
    }

    fn identifiers(properties: &Directory) -> DirectoryIdentifiers {
        DirectoryIdentifiers {
            path: properties.path.clone(),
        }
    }
}
