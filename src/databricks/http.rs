//! HTTP utilities for Databricks REST API calls

use crate::error::{Error, Result};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Raw API response: status plus body text, interpreted by the caller
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Convert a non-success status into an API error
    pub fn error_for_status(self, method: &Method, path: &str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(Error::Api {
            method: method.to_string(),
            path: path.to_string(),
            status: self.status.as_u16(),
            reason: self
                .status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            body: self.body,
        })
    }

    /// Deserialize the body; an empty body is read as `{}`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.trim().is_empty() {
            return Ok(serde_json::from_value(Value::Object(Default::default()))?);
        }
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// HTTP client wrapper for Databricks API calls
#[derive(Clone)]
pub struct DatabricksHttpClient {
    client: Client,
}

impl DatabricksHttpClient {
    /// Create a new HTTP client with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("databricks-extension/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }

    /// Send a request and return the raw response; never fails on HTTP status
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse> {
        tracing::debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method.clone(), url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json");

        if let Some(body) = body {
            request = request.json(body);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, Error>(ApiResponse::new(status, text))
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = exchange => response?,
        };

        if response.is_success() {
            tracing::debug!("{} {} -> {}", method, url, response.status);
        } else {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!(
                "API error: {} {} -> {} - {}",
                method,
                url,
                response.status,
                sanitize_for_log(&response.body)
            );
        }

        Ok(response)
    }
}
