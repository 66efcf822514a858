use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::params::State;
use octocrab::Octocrab;
use serde::Deserialize;
use tracing::{debug, info};

use super::{http_client, FetchRequest, ReviewSource};
use crate::models::{Comment, ReviewRecord, ServiceKind};

const GITHUB_API: &str = "https://api.github.com";

/// GitHub pull-request source. Listing goes through octocrab; the comment
/// and repository-enumeration endpoints are plain REST calls.
#[derive(Debug)]
pub struct GithubSource {
    client: Octocrab,
    http: reqwest::Client,
    token: Option<String>,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct IssueComment {
    user: CommentAuthor,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CommentAuthor {
    login: String,
}

#[derive(Debug, Deserialize)]
struct UserRepo {
    name: String,
    archived: bool,
}

impl GithubSource {
    pub fn new(token: Option<String>, ssl_verify: bool) -> Result<Self> {
        let client = match &token {
            Some(token) => Octocrab::builder().personal_token(token.clone()).build(),
            None => Octocrab::builder().build(),
        }
        .context("Failed to create GitHub client")?;
        let http = http_client(ssl_verify).context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            http,
            token,
            api_base: GITHUB_API.to_string(),
        })
    }

    /// Point the REST endpoints at a different API base (GitHub Enterprise,
    /// tests).
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        request
    }

    /// Enumerates a user's repositories for user-wide targets (a bare
    /// `owner` entry with no repository part).
    async fn list_user_repos(&self, user: &str) -> Result<Vec<String>> {
        let url = format!("{}/users/{}/repos?per_page=100", self.api_base, user);
        let response = self
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to list repositories for {}", user))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error ({}): {}", status, error_text);
        }

        let repos: Vec<UserRepo> = response
            .json()
            .await
            .context("Failed to parse repository list")?;

        Ok(repos
            .into_iter()
            .filter(|r| !r.archived)
            .map(|r| r.name)
            .collect())
    }

    async fn last_comment(&self, owner: &str, repo: &str, number: u64) -> Result<Option<Comment>> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments?per_page=1&sort=created&direction=desc",
            self.api_base, owner, repo, number
        );
        let response = self
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch comments for {}/{}#{}", owner, repo, number))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error ({}): {}", status, error_text);
        }

        let comments: Vec<IssueComment> =
            response.json().await.context("Failed to parse comments")?;

        Ok(comments.into_iter().next().map(|c| Comment {
            author: c.user.login,
            created_at: c.created_at,
        }))
    }

    async fn fetch_repo(
        &self,
        owner: &str,
        repo: &str,
        show_last_comment: bool,
    ) -> Result<Vec<ReviewRecord>> {
        debug!(owner, repo, "Listing open pull requests");

        let page = self
            .client
            .pulls(owner, repo)
            .list()
            .state(State::Open)
            .per_page(100)
            .send()
            .await
            .with_context(|| format!("Failed to list pull requests for {}/{}", owner, repo))?;

        let mut records = Vec::new();
        for pr in page.items {
            let number = pr.number;
            let time = pr
                .created_at
                .with_context(|| format!("{}/{}#{} has no creation time", owner, repo, number))?;

            let last_comment = if show_last_comment {
                self.last_comment(owner, repo, number).await?
            } else {
                None
            };

            records.push(ReviewRecord {
                service: ServiceKind::Github,
                user: pr.user.as_ref().map(|u| u.login.clone()).unwrap_or_default(),
                title: pr.title.clone().unwrap_or_default(),
                url: pr
                    .html_url
                    .as_ref()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| {
                        format!("https://github.com/{}/{}/pull/{}", owner, repo, number)
                    }),
                repo_name: Some(format!("{}/{}", owner, repo)),
                user_name: Some(owner.to_string()),
                time,
                updated_time: pr.updated_at.or(Some(time)),
                comment_count: 0,
                last_comment,
                is_wip: pr.draft.unwrap_or(false),
                is_automated: false,
            });
        }

        Ok(records)
    }
}

#[async_trait]
impl ReviewSource for GithubSource {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Github
    }

    async fn request_reviews(&self, request: &FetchRequest) -> Result<Vec<ReviewRecord>> {
        let owner = request
            .user_name
            .as_deref()
            .context("github target requires an owner")?;

        let repos = match &request.repo_name {
            Some(repo) => vec![repo.clone()],
            None => {
                info!(owner, "No repository given, polling all of the owner's repositories");
                self.list_user_repos(owner).await?
            }
        };

        let mut records = Vec::new();
        for repo in &repos {
            records.extend(
                self.fetch_repo(owner, repo, request.show_last_comment)
                    .await?,
            );
        }

        info!(owner, count = records.len(), "Fetched GitHub pull requests");

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_list_user_repos_skips_archived() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/alice/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "active", "archived": false},
                {"name": "attic", "archived": true}
            ])))
            .mount(&server)
            .await;

        let source = GithubSource::new(None, true)
            .unwrap()
            .with_api_base(&server.uri());

        let repos = source.list_user_repos("alice").await.unwrap();
        assert_eq!(repos, ["active"]);
    }

    #[tokio::test]
    async fn test_last_comment_maps_newest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/org/repo/issues/7/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"user": {"login": "bob"}, "created_at": "2024-03-01T10:00:00Z"}
            ])))
            .mount(&server)
            .await;

        let source = GithubSource::new(None, true)
            .unwrap()
            .with_api_base(&server.uri());

        let comment = source.last_comment("org", "repo", 7).await.unwrap().unwrap();
        assert_eq!(comment.author, "bob");
    }

    #[tokio::test]
    async fn test_last_comment_none_when_silent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/org/repo/issues/8/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let source = GithubSource::new(None, true)
            .unwrap()
            .with_api_base(&server.uri());

        assert!(source.last_comment("org", "repo", 8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_request_reviews_requires_owner() {
        let source = GithubSource::new(None, true).unwrap();
        let err = source
            .request_reviews(&FetchRequest::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("requires an owner"));
    }
}
