//! Git folder (repo) handler
//!
//! Create is attempted first; the service answers "already exists" when a
//! repo occupies the path, in which case the existing repo is located by
//! listing and then updated.

use super::{non_empty, HandlerContext, ResourceHandler, ResourceRequest};
use crate::databricks::client::{self, WorkspaceClient};
use crate::databricks::paging::{fetch_all_pages, Paginated};
use crate::error::{Error, Result};
use crate::models::{Repo, RepoIdentifiers};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const REPOS_PATH: &str = "2.0/repos";

/// Git providers accepted by the repos and git-credentials APIs
pub const GIT_PROVIDERS: [&str; 8] = [
    "gitHub",
    "bitbucketCloud",
    "gitLab",
    "azureDevOpsServices",
    "gitHubEnterprise",
    "bitbucketServer",
    "gitLabEnterpriseEdition",
    "awsCodeCommit",
];

/// Canonical spelling of a provider name, matched case-insensitively
pub fn canonical_provider(provider: &str) -> Option<&'static str> {
    GIT_PROVIDERS
        .iter()
        .copied()
        .find(|p| p.eq_ignore_ascii_case(provider.trim()))
}

fn repo_path(id: i64) -> String {
    format!("{}/{}", REPOS_PATH, id)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RepoInfo {
    id: i64,
    url: Option<String>,
    provider: Option<String>,
    path: Option<String>,
    branch: Option<String>,
    head_commit_id: Option<String>,
    sparse_checkout: Option<WireSparseCheckoutInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct WireSparseCheckoutInfo {
    patterns: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RepoList {
    repos: Vec<RepoInfo>,
    next_page_token: Option<String>,
}

impl Paginated for RepoList {
    type Item = RepoInfo;

    fn into_page(self) -> (Vec<RepoInfo>, Option<String>) {
        (self.repos, self.next_page_token)
    }
}

#[derive(Debug, Serialize)]
struct SparseCheckout<'a> {
    patterns: &'a [String],
}

#[derive(Debug, Serialize)]
struct CreateRepo<'a> {
    url: &'a str,
    provider: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sparse_checkout: Option<SparseCheckout<'a>>,
}

#[derive(Debug, Serialize)]
struct UpdateRepo<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sparse_checkout: Option<SparseCheckout<'a>>,
}

impl<'a> UpdateRepo<'a> {
    fn from_desired(repo: &'a Repo) -> Self {
        Self {
            branch: non_empty(&repo.branch),
            tag: non_empty(&repo.tag),
            sparse_checkout: sparse_checkout(repo),
        }
    }

    fn is_empty(&self) -> bool {
        self.branch.is_none() && self.tag.is_none() && self.sparse_checkout.is_none()
    }
}

fn sparse_checkout(repo: &Repo) -> Option<SparseCheckout<'_>> {
    repo.sparse_checkout_patterns
        .as_deref()
        .filter(|patterns| !patterns.is_empty())
        .map(|patterns| SparseCheckout { patterns })
}

/// Validate the request and return the canonical provider name
fn validate(repo: &Repo) -> Result<&'static str> {
    let provider = canonical_provider(&repo.provider).ok_or_else(|| {
        Error::validation(format!(
            "Invalid provider: {}. Valid providers are: {}",
            repo.provider,
            GIT_PROVIDERS.join(", ")
        ))
    })?;

    match url::Url::parse(&repo.url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {},
        _ => {
            return Err(Error::validation(format!(
                "Url must be an absolute http(s) URL (got '{}')",
                repo.url
            )))
        },
    }

    if non_empty(&repo.branch).is_some() && non_empty(&repo.tag).is_some() {
        return Err(Error::validation("Only one of Branch or Tag can be specified"));
    }
    Ok(provider)
}

fn from_remote(desired: Repo, info: RepoInfo) -> Repo {
    Repo {
        repo_id: Some(info.id.to_string()),
        url: info.url.unwrap_or(desired.url),
        provider: info.provider.unwrap_or(desired.provider),
        path: info.path.clone().or(desired.path),
        branch: info.branch.or(desired.branch),
        // tags are not reported back
        tag: desired.tag,
        sparse_checkout_patterns: info
            .sparse_checkout
            .map(|s| s.patterns)
            .or(desired.sparse_checkout_patterns),
        head_commit_id: info.head_commit_id,
        workspace_path: info.path,
    }
}

pub struct RepoHandler {
    ctx: HandlerContext,
}

impl RepoHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    /// Find the repo the "already exists" error refers to
    ///
    /// With a path, only the repo at that exact path qualifies. Without one,
    /// the URL must identify a single repo.
    async fn find_existing(
        &self,
        client: &dyn WorkspaceClient,
        repo: &Repo,
        cancel: &CancellationToken,
    ) -> Result<RepoInfo> {
        let repos =
            fetch_all_pages::<RepoList>(client, REPOS_PATH, "next_page_token", cancel).await?;

        let (mut matches, wanted): (Vec<RepoInfo>, String) = match non_empty(&repo.path) {
            Some(path) => (
                repos
                    .into_iter()
                    .filter(|r| r.path.as_deref() == Some(path))
                    .collect(),
                format!("path '{}'", path),
            ),
            None => (
                repos
                    .into_iter()
                    .filter(|r| r.url.as_deref() == Some(repo.url.as_str()))
                    .collect(),
                format!("url '{}'", repo.url),
            ),
        };

        let count = matches.len();
        match matches.pop() {
            Some(found) if count == 1 => Ok(found),
            None => Err(Error::Conflict(format!(
                "repo reported as existing but no repo matches {}",
                wanted
            ))),
            Some(_) => {
                tracing::warn!(match_count = count, "Found {} repos matching {}", count, wanted);
                Err(Error::Conflict(format!(
                    "{} repos match {}; refusing to pick one",
                    count, wanted
                )))
            },
        }
    }

    /// Apply branch/tag/sparse checkout when requested, then read the repo back
    async fn update_and_get(
        &self,
        client: &dyn WorkspaceClient,
        repo: &Repo,
        current: RepoInfo,
        cancel: &CancellationToken,
    ) -> Result<RepoInfo> {
        let update = UpdateRepo::from_desired(repo);
        if update.is_empty() {
            return Ok(current);
        }
        let path = repo_path(current.id);
        tracing::info!(
            "Updating repo {} (branch {:?}, tag {:?})",
            current.id,
            update.branch,
            update.tag
        );
        let _: serde_json::Value = client::patch(client, &path, &update, cancel).await?;
        client::get(client, &path, cancel).await
    }
}

#[async_trait]
impl ResourceHandler for RepoHandler {
    type Properties = Repo;
    type Identifiers = RepoIdentifiers;

    const RESOURCE_TYPE: &'static str = "Repo";

    async fn create_or_update(
        &self,
        request: ResourceRequest<Repo>,
        cancel: &CancellationToken,
    ) -> Result<Repo> {
        let repo = request.properties;
        let provider = validate(&repo)?;
        let client = self.ctx.client(&request.config, cancel).await?;

        tracing::info!("Creating repo from '{}' at {:?}", repo.url, repo.path);
        let payload = CreateRepo {
            url: &repo.url,
            provider,
            path: non_empty(&repo.path),
            sparse_checkout: sparse_checkout(&repo),
        };
        let info = match client::post::<_, RepoInfo>(client.as_ref(), REPOS_PATH, &payload, cancel)
            .await
        {
            Ok(created) => {
                tracing::info!("Repo created with id {}", created.id);
                // sparse checkout was already applied by create
                let update = UpdateRepo {
                    sparse_checkout: None,
                    ..UpdateRepo::from_desired(&repo)
                };
                if update.is_empty() {
                    created
                } else {
                    let path = repo_path(created.id);
                    let _: serde_json::Value =
                        client::patch(client.as_ref(), &path, &update, cancel).await?;
                    client::get(client.as_ref(), &path, cancel).await?
                }
            },
            Err(e) if e.is_already_exists() => {
                tracing::info!("Repo already exists; locating it");
                let existing = self.find_existing(client.as_ref(), &repo, cancel).await?;
                tracing::info!("Found existing repo {}", existing.id);
                self.update_and_get(client.as_ref(), &repo, existing, cancel)
                    .await?
            },
            Err(e) => return Err(e),
        };

        Ok(from_remote(repo, info))
    }

    fn identifiers(properties: &Repo) -> RepoIdentifiers {
        RepoIdentifiers {
            repo_id: properties.repo_id.clone(),
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

    const URL: &str = "https://github.com/contoso/pipelines.git";
    const PATH: &str = "/Repos/ci/pipelines";

    fn handler(workspace: &Arc<FakeWorkspace>) -> RepoHandler {
        RepoHandler::new(HandlerContext::new(FakeFactory::shared(workspace.clone())))
    }

    fn request(repo: Repo) -> ResourceRequest<Repo> {
        ResourceRequest::new(
            "Repo",
            Configuration::new("https://adb-1.azuredatabricks.net"),
            repo,
        )
    }

    fn pipelines() -> Repo {
        Repo {
            url: URL.to_string(),
            provider: "github".to_string(),
            path: Some(PATH.to_string()),
            ..Default::default()
        }
    }

    fn already_exists() -> serde_json::Value {
        json!({"error_code": "RESOURCE_ALREADY_EXISTS", "message": "Repo already exists at /Repos/ci/pipelines"})
    }

    #[test]
    fn providers_match_case_insensitively() {
        assert_eq!(canonical_provider("GITHUB"), Some("gitHub"));
        assert_eq!(canonical_provider("azuredevopsservices"), Some("azureDevOpsServices"));
        assert_eq!(canonical_provider("svn"), None);
    }

    #[tokio::test]
    async fn invalid_provider_lists_valid_ones() {
        let workspace = FakeWorkspace::new();
        let repo = Repo {
            provider: "svn".to_string(),
            ..pipelines()
        };
        let err = handler(&workspace)
            .create_or_update(request(repo), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("gitLabEnterpriseEdition")));
        assert!(workspace.calls().is_empty());
    }

    #[test]
    fn non_http_url_and_branch_with_tag_are_rejected() {
        let ssh = Repo {
            url: "git@github.com:contoso/pipelines.git".to_string(),
            ..pipelines()
        };
        assert!(validate(&ssh).is_err());

        let both = Repo {
            branch: Some("main".to_string()),
            tag: Some("v1".to_string()),
            ..pipelines()
        };
        assert!(validate(&both).is_err());
    }

    #[tokio::test]
    async fn create_then_checkout_branch() {
        let workspace = FakeWorkspace::new();
        workspace
            .on(Method::POST, REPOS_PATH, 200, json!({"id": 77, "url": URL, "path": PATH, "branch": "main"}))
            .on(Method::PATCH, "2.0/repos/77", 200, json!({}))
            .on(
                Method::GET,
                "2.0/repos/77",
                200,
                json!({"id": 77, "url": URL, "provider": "gitHub", "path": PATH, "branch": "release", "head_commit_id": "abc123"}),
            );
        let repo = Repo {
            branch: Some("release".to_string()),
            sparse_checkout_patterns: Some(vec!["jobs".to_string()]),
            ..pipelines()
        };

        let converged = handler(&workspace)
            .create_or_update(request(repo), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            workspace.body_of(Method::POST, REPOS_PATH),
            Some(json!({"url": URL, "provider": "gitHub", "path": PATH, "sparse_checkout": {"patterns": ["jobs"]}}))
        );
        assert_eq!(
            workspace.body_of(Method::PATCH, "2.0/repos/77"),
            Some(json!({"branch": "release"}))
        );
        assert_eq!(converged.repo_id.as_deref(), Some("77"));
        assert_eq!(converged.branch.as_deref(), Some("release"));
        assert_eq!(converged.head_commit_id.as_deref(), Some("abc123"));
        assert_eq!(converged.workspace_path.as_deref(), Some(PATH));
    }

    #[tokio::test]
    async fn plain_create_skips_update() {
        let workspace = FakeWorkspace::new();
        workspace.on(Method::POST, REPOS_PATH, 200, json!({"id": 5, "url": URL, "path": PATH}));

        let converged = handler(&workspace)
            .create_or_update(request(pipelines()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(workspace.lines(), vec!["POST 2.0/repos"]);
        assert_eq!(converged.repo_id.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn already_exists_updates_the_listed_repo_across_pages() {
        let workspace = FakeWorkspace::new();
        workspace
            .on(Method::POST, REPOS_PATH, 400, already_exists())
            .on(
                Method::GET,
                REPOS_PATH,
                200,
                json!({"repos": [{"id": 1, "path": "/Repos/other", "url": "https://github.com/contoso/other.git"}], "next_page_token": "p2"}),
            )
            .on(
                Method::GET,
                "2.0/repos?next_page_token=p2",
                200,
                json!({"repos": [{"id": 9, "path": PATH, "url": URL}]}),
            )
            .on(Method::PATCH, "2.0/repos/9", 200, json!({}))
            .on(Method::GET, "2.0/repos/9", 200, json!({"id": 9, "path": PATH, "url": URL, "branch": "main"}));
        let repo = Repo {
            branch: Some("main".to_string()),
            ..pipelines()
        };

        let converged = handler(&workspace)
            .create_or_update(request(repo), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            workspace.lines(),
            vec![
                "POST 2.0/repos",
                "GET 2.0/repos",
                "GET 2.0/repos?next_page_token=p2",
                "PATCH 2.0/repos/9",
                "GET 2.0/repos/9"
            ]
        );
        assert_eq!(converged.repo_id.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn already_exists_without_match_is_a_conflict() {
        let workspace = FakeWorkspace::new();
        workspace
            .on(Method::POST, REPOS_PATH, 400, already_exists())
            .on(Method::GET, REPOS_PATH, 200, json!({}));

        let err = handler(&workspace)
            .create_or_update(request(pipelines()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Conflict(ref m) if m.contains(PATH)));
        assert_eq!(workspace.count(Method::PATCH, "2.0/repos/9"), 0);
    }

    #[tokio::test]
    async fn shared_url_resolves_by_exact_path() {
        let workspace = FakeWorkspace::new();
        workspace
            .on(Method::POST, REPOS_PATH, 400, already_exists())
            .on(
                Method::GET,
                REPOS_PATH,
                200,
                json!({"repos": [
                    {"id": 11, "path": "/Repos/other/pipelines", "url": URL},
                    {"id": 22, "path": PATH, "url": URL}
                ]}),
            )
            .on(Method::PATCH, "2.0/repos/22", 200, json!({}))
            .on(Method::GET, "2.0/repos/22", 200, json!({"id": 22, "path": PATH, "url": URL, "branch": "main"}));
        let repo = Repo {
            branch: Some("main".to_string()),
            ..pipelines()
        };

        let converged = handler(&workspace)
            .create_or_update(request(repo), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            workspace.lines(),
            vec!["POST 2.0/repos", "GET 2.0/repos", "PATCH 2.0/repos/22", "GET 2.0/repos/22"]
        );
        assert_eq!(converged.repo_id.as_deref(), Some("22"));
        assert_eq!(converged.workspace_path.as_deref(), Some(PATH));
    }

    #[tokio::test]
    async fn url_only_match_must_be_unique() {
        let workspace = FakeWorkspace::new();
        workspace
            .on(Method::POST, REPOS_PATH, 400, already_exists())
            .on(
                Method::GET,
                REPOS_PATH,
                200,
                json!({"repos": [
                    {"id": 11, "path": "/Repos/other/pipelines", "url": URL},
                    {"id": 22, "path": PATH, "url": URL}
                ]}),
            );
        let repo = Repo {
            path: None,
            branch: Some("main".to_string()),
            ..pipelines()
        };

        let err = handler(&workspace)
            .create_or_update(request(repo), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Conflict(ref m) if m.contains("2 repos match")));
        assert_eq!(workspace.lines(), vec!["POST 2.0/repos", "GET 2.0/repos"]);
    }

    #[tokio::test]
    async fn url_only_unique_match_is_updated() {
        let workspace = FakeWorkspace::new();
        workspace
            .on(Method::POST, REPOS_PATH, 400, already_exists())
            .on(
                Method::GET,
                REPOS_PATH,
                200,
                json!({"repos": [
                    {"id": 11, "path": "/Repos/other/tools", "url": "https://github.com/contoso/tools.git"},
                    {"id": 22, "path": PATH, "url": URL}
                ]}),
            );
        let repo = Repo {
            path: None,
            ..pipelines()
        };

        let converged = handler(&workspace)
            .create_or_update(request(repo), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(workspace.lines(), vec!["POST 2.0/repos", "GET 2.0/repos"]);
        assert_eq!(converged.repo_id.as_deref(), Some("22"));
    }

    #[tokio::test]
    async fn other_create_errors_propagate() {
        let workspace = FakeWorkspace::new();
        workspace.on(Method::POST, REPOS_PATH, 403, json!({"error_code": "PERMISSION_DENIED"}));

        let err = handler(&workspace)
            .create_or_update(request(pipelines()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(403));
        assert_eq!(workspace.lines(), vec!["POST 2.0/repos"]);
    }
}
