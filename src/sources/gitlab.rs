use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::{http_client, FetchRequest, ReviewSource};
use crate::models::{Comment, ReviewRecord, ServiceKind};

/// GitLab merge-request source, speaking the v4 REST API.
#[derive(Debug)]
pub struct GitlabSource {
    http: reqwest::Client,
    host: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    iid: u64,
    title: String,
    web_url: String,
    author: GitlabUser,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    work_in_progress: bool,
    #[serde(default)]
    user_notes_count: u64,
}

#[derive(Debug, Deserialize)]
struct GitlabUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct Note {
    author: GitlabUser,
    created_at: DateTime<Utc>,
    /// System notes record state changes (labels, milestones); they are
    /// not review comments.
    #[serde(default)]
    system: bool,
}

impl GitlabSource {
    pub fn new(host: String, token: Option<String>, ssl_verify: bool) -> Result<Self> {
        let http = http_client(ssl_verify).context("Failed to create HTTP client")?;
        Ok(Self { http, host, token })
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.header("PRIVATE-TOKEN", token);
        }
        request
    }

    async fn last_note(&self, project: &str, iid: u64) -> Result<Option<Comment>> {
        let url = format!(
            "{}/api/v4/projects/{}/merge_requests/{}/notes?order_by=updated_at&sort=desc&per_page=20",
            self.host, project, iid
        );
        let response = self
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch notes for !{}", iid))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("GitLab API error ({}): {}", status, error_text);
        }

        let notes: Vec<Note> = response.json().await.context("Failed to parse notes")?;

        Ok(notes.into_iter().find(|n| !n.system).map(|n| Comment {
            author: n.author.username,
            created_at: n.created_at,
        }))
    }

    fn convert(&self, mr: MergeRequest, repo: &str, owner: Option<&str>) -> ReviewRecord {
        ReviewRecord {
            service: ServiceKind::Gitlab,
            user: mr.author.username,
            title: mr.title,
            url: mr.web_url,
            repo_name: Some(repo.to_string()),
            user_name: owner.map(|o| o.to_string()),
            time: mr.created_at,
            updated_time: mr.updated_at.or(Some(mr.created_at)),
            comment_count: mr.user_notes_count,
            last_comment: None,
            is_wip: mr.draft || mr.work_in_progress,
            is_automated: false,
        }
    }
}

#[async_trait]
impl ReviewSource for GitlabSource {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Gitlab
    }

    async fn request_reviews(&self, request: &FetchRequest) -> Result<Vec<ReviewRecord>> {
        let project = request
            .full_repo()
            .context("gitlab target requires a project path")?;
        let encoded = project.replace('/', "%2F");

        debug!(project = %project, "Listing open merge requests");

        let url = format!(
            "{}/api/v4/projects/{}/merge_requests?state=opened&per_page=100",
            self.host, encoded
        );
        let response = self
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to list merge requests for {}", project))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("GitLab API error ({}): {}", status, error_text);
        }

        let merge_requests: Vec<MergeRequest> = response
            .json()
            .await
            .context("Failed to parse merge request list")?;

        let mut records = Vec::new();
        for mr in merge_requests {
            let iid = mr.iid;
            let has_notes = mr.user_notes_count > 0;
            let mut record = self.convert(mr, &project, request.user_name.as_deref());
            if request.show_last_comment && has_notes {
                record.last_comment = self.last_note(&encoded, iid).await?;
            }
            records.push(record);
        }

        info!(project = %project, count = records.len(), "Fetched GitLab merge requests");

        Ok(records)
    }
}
