//! Databricks Authentication
//!
//! Resolves a bearer token for the workspace API. An explicit token in the
//! environment wins; otherwise the ambient Azure credential chain (Azure CLI,
//! managed identity, workload identity, ...) is asked for a token scoped to
//! the Azure Databricks first-party application.

use crate::error::{Error, Result};
use async_trait::async_trait;
use azure_core::auth::TokenCredential;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Scope of the Azure Databricks resource application
pub const DATABRICKS_SCOPE: &str = "2ff814a6-3304-4ab8-85cb-cd0e6f879c1d/.default";

/// Source of bearer tokens for the workspace API
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Get an access token; may call an identity endpoint
    async fn token(&self, cancel: &CancellationToken) -> Result<String>;
}

/// Fixed token, used for explicit tokens and tests
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self, _cancel: &CancellationToken) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Environment override with fallback to the ambient Azure credential chain
pub struct AzureTokenProvider {
    env_var: String,
    credential: OnceCell<Arc<dyn TokenCredential>>,
}

impl AzureTokenProvider {
    pub fn new(env_var: impl Into<String>) -> Self {
        Self {
            env_var: env_var.into(),
            credential: OnceCell::new(),
        }
    }

    /// Token from the environment, if set and non-empty
    fn env_token(&self) -> Option<String> {
        std::env::var(&self.env_var)
            .ok()
            .filter(|token| !token.is_empty())
    }

    async fn credential(&self) -> Result<&Arc<dyn TokenCredential>> {
        self.credential
            .get_or_try_init(|| async {
                azure_identity::create_credential().map_err(|e| {
                    Error::Auth(format!("failed to initialize Azure credential chain: {}", e))
                })
            })
            .await
    }
}

#[async_trait]
impl TokenSource for AzureTokenProvider {
    async fn token(&self, cancel: &CancellationToken) -> Result<String> {
        if let Some(token) = self.env_token() {
            tracing::info!(
                "Using Databricks access token from environment variable {} (length {})",
                self.env_var,
                token.len()
            );
            return Ok(token);
        }

        tracing::info!(
            "Acquiring Databricks access token via Azure credential chain for scope {}",
            DATABRICKS_SCOPE
        );
        let credential = self.credential().await?;

        let token = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            token = credential.get_token(&[DATABRICKS_SCOPE]) => token,
        }
        .map_err(|e| Error::Auth(format!("failed to get access token: {}", e)))?;

        tracing::info!(
            "Acquired Databricks access token (expires {})",
            token.expires_on
        );
        Ok(token.token.secret().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_returns_token_verbatim() {
        let source = StaticTokenSource::new("dapi-123");
        let token = source.token(&CancellationToken::new()).await.unwrap();
        assert_eq!(token, "dapi-123");
    }

    #[tokio::test]
    async fn environment_token_wins_without_validation() {
        let var = "DATABRICKS_EXTENSION_TEST_TOKEN_SET";
        std::env::set_var(var, "not-a-jwt");
        let provider = AzureTokenProvider::new(var);
        let token = provider.token(&CancellationToken::new()).await.unwrap();
        assert_eq!(token, "not-a-jwt");
        std::env::remove_var(var);
    }

    #[test]
    fn empty_environment_token_is_ignored() {
        let var = "DATABRICKS_EXTENSION_TEST_TOKEN_EMPTY";
        std::env::set_var(var, "");
        let provider = AzureTokenProvider::new(var);
        assert!(provider.env_token().is_none());
        std::env::remove_var(var);
    }
}
