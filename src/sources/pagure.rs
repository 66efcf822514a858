use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::{http_client, FetchRequest, ReviewSource};
use crate::models::{Comment, ReviewRecord, ServiceKind};

/// Pagure pull-request source. The list endpoint embeds every comment, so
/// `last_comment` never costs a second fetch here.
#[derive(Debug)]
pub struct PagureSource {
    http: reqwest::Client,
    host: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequestList {
    requests: Vec<PagurePullRequest>,
}

#[derive(Debug, Deserialize)]
struct PagurePullRequest {
    id: u64,
    title: String,
    user: PagureUser,
    /// Unix epoch seconds, serialized as a string.
    date_created: String,
    last_updated: Option<String>,
    #[serde(default)]
    comments: Vec<PagureComment>,
}

#[derive(Debug, Deserialize)]
struct PagureUser {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PagureComment {
    user: PagureUser,
    date_created: String,
    /// Notification comments record pushes and rebases, not review input.
    #[serde(default)]
    notification: bool,
}

fn parse_epoch(s: &str) -> Result<DateTime<Utc>> {
    let secs: i64 = s
        .parse()
        .with_context(|| format!("Invalid epoch timestamp: {}", s))?;
    DateTime::from_timestamp(secs, 0)
        .with_context(|| format!("Epoch timestamp out of range: {}", s))
}

impl PagureSource {
    pub fn new(host: String, token: Option<String>, ssl_verify: bool) -> Result<Self> {
        let http = http_client(ssl_verify).context("Failed to create HTTP client")?;
        Ok(Self { http, host, token })
    }

    fn convert(
        &self,
        pr: PagurePullRequest,
        repo: &str,
        show_last_comment: bool,
    ) -> Result<ReviewRecord> {
        let time = parse_epoch(&pr.date_created)?;
        let updated_time = match &pr.last_updated {
            Some(updated) => Some(parse_epoch(updated)?),
            None => Some(time),
        };

        let review_comments: Vec<&PagureComment> =
            pr.comments.iter().filter(|c| !c.notification).collect();
        let comment_count = review_comments.len() as u64;

        let last_comment = if show_last_comment {
            review_comments
                .last()
                .map(|c| {
                    Ok::<Comment, anyhow::Error>(Comment {
                        author: c.user.name.clone(),
                        created_at: parse_epoch(&c.date_created)?,
                    })
                })
                .transpose()?
        } else {
            None
        };

        Ok(ReviewRecord {
            service: ServiceKind::Pagure,
            user: pr.user.name,
            title: pr.title,
            url: format!("{}/{}/pull-request/{}", self.host, repo, pr.id),
            repo_name: Some(repo.to_string()),
            user_name: None,
            time,
            updated_time,
            comment_count,
            last_comment,
            is_wip: false,
            is_automated: false,
        })
    }
}

#[async_trait]
impl ReviewSource for PagureSource {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Pagure
    }

    async fn request_reviews(&self, request: &FetchRequest) -> Result<Vec<ReviewRecord>> {
        let repo = request
            .full_repo()
            .context("pagure target requires a repository name")?;

        debug!(repo = %repo, "Listing open pull requests");

        let url = format!("{}/api/0/{}/pull-requests", self.host, repo);
        let mut http_request = self.http.get(url);
        if let Some(token) = &self.token {
            http_request = http_request.header("Authorization", format!("token {}", token));
        }

        let response = http_request
            .send()
            .await
            .with_context(|| format!("Failed to list pull requests for {}", repo))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Pagure API error ({}): {}", status, error_text);
        }

        let list: PullRequestList = response
            .json()
            .await
            .context("Failed to parse pull request list")?;

        let mut records = Vec::new();
        for pr in list.requests {
            records.push(self.convert(pr, &repo, request.show_last_comment)?);
        }

        info!(repo = %repo, count = records.len(), "Fetched Pagure pull requests");

        Ok(records)
    }
}
