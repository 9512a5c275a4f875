//! Git credential handler
//!
//! Credentials have no natural key: an existing one is matched by name
//! first, then by provider and username.

use super::repo::canonical_provider;
use super::{non_empty, HandlerContext, ResourceHandler, ResourceRequest};
use crate::databricks::client;
use crate::error::{Error, Result};
use crate::models::{GitCredential, GitCredentialIdentifiers};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const CREDENTIALS_PATH: &str = "2.0/git-credentials";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CredentialList {
    credentials: Vec<CredentialInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CredentialInfo {
    credential_id: i64,
    git_provider: Option<String>,
    git_username: Option<String>,
    name: Option<String>,
    is_default_for_provider: bool,
}

#[derive(Debug, Serialize)]
struct CredentialPayload<'a> {
    git_provider: &'a str,
    git_username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    personal_access_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    is_default_for_provider: bool,
}

fn same_provider(a: &str, b: &str) -> bool {
    match (canonical_provider(a), canonical_provider(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.eq_ignore_ascii_case(b),
    }
}

/// The single credential matching `predicate`; none or several is no match
fn unique<'a>(
    credentials: &'a [CredentialInfo],
    by: &str,
    predicate: impl Fn(&CredentialInfo) -> bool,
) -> Option<&'a CredentialInfo> {
    let matches: Vec<&CredentialInfo> = credentials.iter().filter(|&c| predicate(c)).collect();
    match matches.as_slice() {
        [found] => {
            tracing::debug!("Matched git credential {} by {}", found.credential_id, by);
            Some(*found)
        },
        [] => None,
        several => {
            tracing::warn!(
                match_count = several.len(),
                "Found {} git credentials matching {}; treating as not found",
                several.len(),
                by
            );
            None
        },
    }
}

/// Match by name when one is given, else by provider and username
fn find_match<'a>(
    credentials: &'a [CredentialInfo],
    desired: &GitCredential,
) -> Option<&'a CredentialInfo> {
    if let Some(name) = non_empty(&desired.name) {
        let by_name = unique(credentials, &format!("name '{}'", name), |c| {
            c.name.as_deref() == Some(name)
        });
        if by_name.is_some() {
            return by_name;
        }
    }
    unique(
        credentials,
        &format!("provider/username '{}/{}'", desired.git_provider, desired.git_username),
        |c| {
            c.git_provider
                .as_deref()
                .is_some_and(|p| same_provider(p, &desired.git_provider))
                && c.git_username.as_deref() == Some(desired.git_username.as_str())
        },
    )
}

/// Converged credential; the token is never returned by the service
fn from_remote(desired: GitCredential, info: CredentialInfo) -> GitCredential {
    GitCredential {
        credential_id: Some(info.credential_id.to_string()),
        git_provider: info.git_provider.unwrap_or(desired.git_provider),
        git_username: info.git_username.unwrap_or(desired.git_username),
        personal_access_token: desired.personal_access_token,
        name: info.name.or(desired.name),
        is_default_for_provider: info.is_default_for_provider,
    }
}

pub struct GitCredentialHandler {
    ctx: HandlerContext,
}

impl GitCredentialHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ResourceHandler for GitCredentialHandler {
    type Properties = GitCredential;
    type Identifiers = GitCredentialIdentifiers;

    const RESOURCE_TYPE: &'static str = "GitCredential";

    async fn create_or_update(
        &self,
        request: ResourceRequest<GitCredential>,
        cancel: &CancellationToken,
    ) -> Result<GitCredential> {
        let credential = request.properties;
        if credential.git_provider.trim().is_empty() {
            return Err(Error::validation("GitProvider is required"));
        }
        if credential.git_username.trim().is_empty() {
            return Err(Error::validation("GitUsername is required"));
        }

        let client = self.ctx.client(&request.config, cancel).await?;
        let listed: CredentialList = client::get(client.as_ref(), CREDENTIALS_PATH, cancel).await?;

        let payload = CredentialPayload {
            git_provider: canonical_provider(&credential.git_provider)
                .unwrap_or(credential.git_provider.as_str()),
            git_username: &credential.git_username,
            personal_access_token: non_empty(&credential.personal_access_token),
            name: non_empty(&credential.name),
            is_default_for_provider: credential.is_default_for_provider,
        };

        let info: CredentialInfo = match find_match(&listed.credentials, &credential) {
            Some(existing) => {
                tracing::info!("Updating git credential {}", existing.credential_id);
                let path = format!("{}/{}", CREDENTIALS_PATH, existing.credential_id);
                let updated: CredentialInfo =
                    client::patch(client.as_ref(), &path, &payload, cancel).await?;
                // PATCH may answer with an empty body
                if updated.credential_id == 0 {
                    CredentialInfo {
                        credential_id: existing.credential_id,
                        ..updated
                    }
                } else {
                    updated
                }
            },
            None => {
                tracing::info!(
                    "Creating git credential for {}/{}",
                    credential.git_provider,
                    credential.git_username
                );
                client::post(client.as_ref(), CREDENTIALS_PATH, &payload, cancel).await?
            },
        };

        Ok(from_remote(credential, info))
    }

    fn identifiers(properties: &GitCredential) -> GitCredentialIdentifiers {
        GitCredentialIdentifiers {
            credential_id: properties.credential_id.clone(),
        }
    }
}
