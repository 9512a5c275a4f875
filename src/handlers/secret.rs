//! Secret handler
//!
//! The secrets API cannot read a value back, so every reconciliation is a
//! plain put and values never appear in the output.

use super::{HandlerContext, ResourceHandler, ResourceRequest};
use crate::databricks::client;
use crate::error::{Error, Result};
use crate::models::{Secret, SecretIdentifiers};
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

const PUT_PATH: &str = "2.0/secrets/put";

#[derive(Serialize)]
struct PutSecret<'a> {
    scope: &'a str,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    string_value: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes_value: Option<&'a str>,
}

fn validate(secret: &Secret) -> Result<()> {
    if secret.scope.trim().is_empty() {
        return Err(Error::validation("Scope is required"));
    }
    if secret.key.trim().is_empty() {
        return Err(Error::validation("Key is required"));
    }
    match (&secret.string_value, &secret.bytes_value) {
        (Some(_), Some(_)) => Err(Error::validation(
            "Only one of StringValue or BytesValue can be specified",
        )),
        (None, None) => Err(Error::validation(
            "Either StringValue or BytesValue must be specified",
        )),
        _ => Ok(()),
    }
}

pub struct SecretHandler {
    ctx: HandlerContext,
}

impl SecretHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ResourceHandler for SecretHandler {
    type Properties = Secret;
    type Identifiers = SecretIdentifiers;

    const RESOURCE_TYPE: &'static str = "Secret";

    async fn create_or_update(
        &self,
        request: ResourceRequest<Secret>,
        cancel: &CancellationToken,
    ) -> Result<Secret> {
        let secret = request.properties;
        validate(&secret)?;

        let client = self.ctx.client(&request.config, cancel).await?;
        tracing::info!("Putting secret '{}' in scope '{}'", secret.key, secret.scope);
        let payload = PutSecret {
            scope: &secret.scope,
            key: &secret.key,
            string_value: secret.string_value.as_deref(),
            bytes_value: secret.bytes_value.as_deref(),
        };
        let _: serde_json::Value = client::post(client.as_ref(), PUT_PATH, &payload, cancel).await?;

        Ok(Secret {
            scope: secret.scope,
            key: secret.key,
            string_value: None,
            bytes_value: None,
        })
    }

    fn identifiers(properties: &Secret) -> SecretIdentifiers {
        SecretIdentifiers {
            scope: properties.scope.clone(),
            key: properties.key.clone(),
        }
    }
}
