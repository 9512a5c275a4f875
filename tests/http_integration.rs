//! Integration tests for the Databricks handlers using wiremock
//!
//! These tests drive the real client factory and handlers against a mocked
//! workspace, checking the wire calls, status mapping and converged output.

use databricks_extension::config::Configuration;
use databricks_extension::databricks::auth::StaticTokenSource;
use databricks_extension::databricks::factory::DatabricksClientFactory;
use databricks_extension::databricks::poll::PollConfig;
use databricks_extension::handlers::{HandlerContext, HandlerRegistry, ResourceRequest};
use databricks_extension::Error;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{bearer_token, body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Registry wired to the real factory with a fixed token
fn registry() -> (HandlerRegistry, Arc<DatabricksClientFactory>) {
    let factory = Arc::new(DatabricksClientFactory::new(
        Arc::new(StaticTokenSource::new("test-token")),
        Duration::from_secs(5),
    ));
    let ctx = HandlerContext::new(factory.clone());
    let poll = PollConfig::new(Duration::from_millis(10), 5);
    (HandlerRegistry::standard(ctx, poll), factory)
}

fn request(server: &MockServer, resource_type: &str, properties: Value) -> ResourceRequest<Value> {
    ResourceRequest::new(resource_type, Configuration::new(server.uri()), properties)
}

/// Test module for Unity Catalog handlers
mod unity_catalog_tests {
    use super::*;

    /// Test catalog server fields are carried through verbatim
    #[tokio::test]
    async fn test_catalog_round_trip() {
        let server = MockServer::start().await;
        let remote = json!({
            "name": "main",
            "comment": "analytics",
            "full_name": "main",
            "owner": "data-platform@contoso.com",
            "created_at": 1718000000123_i64,
            "metastore_id": "ms-1"
        });

        Mock::given(method("GET"))
            .and(path("/api/2.1/unity-catalog/catalogs/main"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&remote))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/api/2.1/unity-catalog/catalogs/main"))
            .and(bearer_token("test-token"))
            .and(body_json(json!({"comment": "analytics"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(&remote))
            .expect(1)
            .mount(&server)
            .await;

        let (registry, _) = registry();
        let response = registry
            .dispatch(
                request(&server, "Catalog", json!({"name": "main", "comment": "analytics"})),
                &CancellationToken::new(),
            )
            .await
            .expect("Catalog should converge");

        assert_eq!(response.resource_type, "Catalog");
        assert_eq!(response.api_version, "1.0.0");
        assert_eq!(response.identifiers, json!({"name": "main"}));
        assert_eq!(response.properties["fullName"], "main");
        assert_eq!(response.properties["owner"], "data-platform@contoso.com");
        assert_eq!(response.properties["createdAt"], 1718000000123_i64);
    }

    /// Test 403 surfaces as an API error with a permission hint
    #[tokio::test]
    async fn test_403_maps_to_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/2.1/unity-catalog/catalogs/restricted"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error_code": "PERMISSION_DENIED",
                "message": "User does not have USE CATALOG"
            })))
            .mount(&server)
            .await;

        let (registry, _) = registry();
        let err = assert_err!(
            registry
                .dispatch(
                    request(&server, "Catalog", json!({"name": "restricted"})),
                    &CancellationToken::new(),
                )
                .await
        );

        assert_eq!(err.status(), Some(403));
        assert_eq!(err.code(), "RemoteApiFailed");
        assert!(err.hint().unwrap().contains("Permission denied"));
        assert!(err.to_string().contains("PERMISSION_DENIED"));
    }

    /// Test external location update is a PATCH followed by a re-fetch
    #[tokio::test]
    async fn test_external_location_patch_then_refetch() {
        let server = MockServer::start().await;
        let url = "abfss://landing@contoso.dfs.core.windows.net/";

        // First lookup
        Mock::given(method("GET"))
            .and(path("/api/2.1/unity-catalog/external-locations/landing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "landing",
                "url": "abfss://old@contoso.dfs.core.windows.net/"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/api/2.1/unity-catalog/external-locations/landing"))
            .and(body_json(json!({
                "url": url,
                "credential_name": "lake",
                "read_only": false,
                "fallback": false,
                "skip_validation": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        // Re-fetch after the update
        Mock::given(method("GET"))
            .and(path("/api/2.1/unity-catalog/external-locations/landing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "landing",
                "url": url,
                "credential_name": "lake",
                "owner": "ops"
            })))
            .mount(&server)
            .await;

        let (registry, _) = registry();
        let response = registry
            .dispatch(
                request(
                    &server,
                    "ExternalLocation",
                    json!({"name": "landing", "url": url, "credentialName": "lake"}),
                ),
                &CancellationToken::new(),
            )
            .await
            .expect("External location should converge");

        assert_eq!(response.properties["url"], url);
        assert_eq!(response.properties["owner"], "ops");
    }
}

/// Test module for workspace object handlers
mod workspace_tests {
    use super::*;

    /// Test secret values are sent but never echoed
    #[tokio::test]
    async fn test_secret_values_are_stripped() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/2.0/secrets/put"))
            .and(body_json(json!({"scope": "etl", "key": "api-key", "string_value": "s3cret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let (registry, _) = registry();
        let response = registry
            .dispatch(
                request(
                    &server,
                    "Secret",
                    json!({"scope": "etl", "key": "api-key", "stringValue": "s3cret"}),
                ),
                &CancellationToken::new(),
            )
            .await
            .expect("Secret put should succeed");

        assert_eq!(response.properties, json!({"scope": "etl", "key": "api-key"}));
        assert_eq!(response.identifiers, json!({"scope": "etl", "key": "api-key"}));
    }

    /// Test git credentials are matched by name and patched by id
    #[tokio::test]
    async fn test_git_credential_matched_by_name() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/2.0/git-credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "credentials": [
                    {"credential_id": 3, "git_provider": "gitHub", "git_username": "ci-bot"},
                    {"credential_id": 4, "git_provider": "gitHub", "git_username": "other", "name": "deploy"}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/api/2.0/git-credentials/4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "credential_id": 4,
                "git_provider": "gitHub",
                "git_username": "ci-bot",
                "name": "deploy"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (registry, _) = registry();
        let response = registry
            .dispatch(
                request(
                    &server,
                    "GitCredential",
                    json!({
                        "gitProvider": "GitHub",
                        "gitUsername": "ci-bot",
                        "personalAccessToken": "ghp_token",
                        "name": "deploy"
                    }),
                ),
                &CancellationToken::new(),
            )
            .await
            .expect("Git credential should converge");

        assert_eq!(response.identifiers, json!({"credentialId": "4"}));
        assert_eq!(response.properties["personalAccessToken"], "ghp_token");
    }

    /// Test an existing repo is located by listing when create reports a conflict
    #[tokio::test]
    async fn test_repo_already_exists_path() {
        let server = MockServer::start().await;
        let url = "https://github.com/contoso/pipelines.git";

        Mock::given(method("POST"))
            .and(path("/api/2.0/repos"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error_code": "RESOURCE_ALREADY_EXISTS",
                "message": "/Repos/ci/pipelines already exists"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/2.0/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "repos": [{"id": 9, "path": "/Repos/ci/pipelines", "url": url}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/api/2.0/repos/9"))
            .and(body_json(json!({"branch": "main"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/2.0/repos/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 9,
                "path": "/Repos/ci/pipelines",
                "url": url,
                "provider": "gitHub",
                "branch": "main",
                "head_commit_id": "abc123"
            })))
            .mount(&server)
            .await;

        let (registry, _) = registry();
        let response = registry
            .dispatch(
                request(
                    &server,
                    "Repo",
                    json!({"url": url, "provider": "gitHub", "path": "/Repos/ci/pipelines", "branch": "main"}),
                ),
                &CancellationToken::new(),
            )
            .await
            .expect("Repo should converge");

        assert_eq!(response.identifiers, json!({"repoId": "9"}));
        assert_eq!(response.properties["headCommitId"], "abc123");
    }
}

/// Test module for the cluster handler and client cache
mod cluster_tests {
    use super::*;

    /// Test a terminated cluster is edited without waiting, then read back
    #[tokio::test]
    async fn test_terminated_cluster_is_edited() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/2.1/clusters/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "clusters": [{"cluster_id": "0101-abc", "cluster_name": "etl", "state": "TERMINATED"}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/2.1/clusters/edit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/2.1/clusters/get"))
            .and(query_param("cluster_id", "0101-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cluster_id": "0101-abc",
                "cluster_name": "etl",
                "state": "TERMINATED",
                "node_type_id": "Standard_DS3_v2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (registry, factory) = registry();
        let response = registry
            .dispatch(
                request(
                    &server,
                    "Cluster",
                    json!({"clusterName": "etl", "sparkVersion": "15.4.x-scala2.12", "numWorkers": 2}),
                ),
                &CancellationToken::new(),
            )
            .await
            .expect("Cluster should converge");

        assert_eq!(response.identifiers, json!({"clusterId": "0101-abc"}));
        assert_eq!(response.properties["nodeTypeId"], "Standard_DS3_v2");
        assert_eq!(factory.cached_clients(), 1);
    }

    /// Test clients are cached per workspace across requests
    #[tokio::test]
    async fn test_client_is_reused_across_requests() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/2.0/secrets/put"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(2)
            .mount(&server)
            .await;

        let (registry, factory) = registry();
        for key in ["a", "b"] {
            let response = assert_ok!(
                registry
                    .dispatch(
                        request(&server, "Secret", json!({"scope": "etl", "key": key, "stringValue": "v"})),
                        &CancellationToken::new(),
                    )
                    .await
            );
            assert_eq!(response.identifiers["key"], key);
        }

        assert_eq!(factory.cached_clients(), 1);
    }

    /// Test a cancelled token stops the request before any call
    #[tokio::test]
    async fn test_cancelled_request_makes_no_calls() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/2.0/secrets/put"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let (registry, _) = registry();
        let err = registry
            .dispatch(
                request(&server, "Secret", json!({"scope": "etl", "key": "k", "stringValue": "v"})),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
    }
}
