//! Scripted fakes for handler tests

use crate::databricks::client::WorkspaceClient;
use crate::databricks::factory::ClientFactory;
use crate::databricks::http::ApiResponse;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One recorded call
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl Call {
    /// `"METHOD path"`, handy for sequence assertions
    pub fn line(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

struct Route {
    method: Method,
    path: String,
    responses: VecDeque<ApiResponse>,
}

/// Workspace that replays scripted responses and records every call
///
/// Responses for one (method, path) are served in order; the last one
/// repeats. Unscripted calls get a 404 `RESOURCE_DOES_NOT_EXIST`.
#[derive(Default)]
pub struct FakeWorkspace {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeWorkspace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a response for an exact method and path (query included)
    pub fn on(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
        let status = StatusCode::from_u16(status).unwrap();
        let response = ApiResponse::new(status, body.to_string());
        let mut routes = self.routes.lock().unwrap();
        match routes.iter_mut().find(|r| r.method == method && r.path == path) {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                method,
                path: path.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls as `"METHOD path"` lines
    pub fn lines(&self) -> Vec<String> {
        self.calls().iter().map(Call::line).collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    /// Body of the first call to a method and path
    pub fn body_of(&self, method: Method, path: &str) -> Option<Value> {
        self.calls()
            .into_iter()
            .find(|c| c.method == method && c.path == path)
            .and_then(|c| c.body)
    }

    fn respond(&self, method: &Method, path: &str) -> ApiResponse {
        let mut routes = self.routes.lock().unwrap();
        let Some(route) = routes
            .iter_mut()
            .find(|r| &r.method == method && r.path == path)
        else {
            return ApiResponse::new(
                StatusCode::NOT_FOUND,
                json!({"error_code": "RESOURCE_DOES_NOT_EXIST", "message": "unscripted"})
                    .to_string(),
            );
        };
        if route.responses.len() > 1 {
            route.responses.pop_front().unwrap()
        } else {
            route.responses[0].clone()
        }
    }
}

#[async_trait]
impl WorkspaceClient for FakeWorkspace {
    fn base_url(&self) -> &str {
        "https://adb-test.azuredatabricks.net"
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        _cancel: &CancellationToken,
    ) -> Result<ApiResponse> {
        self.calls.lock().unwrap().push(Call {
            method: method.clone(),
            path: path.to_string(),
            body: body.cloned(),
        });
        Ok(self.respond(&method, path))
    }
}

/// Factory handing out one shared fake workspace
pub struct FakeFactory {
    workspace: Arc<FakeWorkspace>,
}

impl FakeFactory {
    pub fn shared(workspace: Arc<FakeWorkspace>) -> Arc<dyn ClientFactory> {
        Arc::new(Self { workspace })
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn client(
        &self,
        _workspace_url: &str,
        _timeout: Option<Duration>,
        _cancel: &CancellationToken,
    ) -> Result<Arc<dyn WorkspaceClient>> {
        Ok(self.workspace.clone() as Arc<dyn WorkspaceClient>)
    }

    async fn call_api(
        &self,
        _workspace_url: &str,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        _timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse> {
        self.workspace.send(method, path, payload, cancel).await
    }
}
