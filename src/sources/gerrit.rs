use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::{http_client, FetchRequest, ReviewSource};
use crate::models::{Comment, ReviewRecord, ServiceKind};

/// Gerrit change source. Honors the `reviewers` target config by adding
/// `reviewer:` terms to the change query.
#[derive(Debug)]
pub struct GerritSource {
    http: reqwest::Client,
    host: String,
}

#[derive(Debug, Deserialize)]
struct GerritChange {
    #[serde(rename = "_number")]
    number: u64,
    subject: String,
    /// Gerrit timestamp, e.g. "2024-02-01 09:59:32.126000000" (UTC).
    created: String,
    updated: Option<String>,
    #[serde(default)]
    work_in_progress: bool,
    #[serde(default)]
    owner: GerritAccount,
    #[serde(default)]
    messages: Vec<GerritMessage>,
    #[serde(default)]
    total_comment_count: u64,
}

#[derive(Debug, Default, Deserialize)]
struct GerritAccount {
    name: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GerritMessage {
    author: Option<GerritAccount>,
    date: String,
}

impl GerritAccount {
    fn display(self) -> String {
        self.username.or(self.name).unwrap_or_default()
    }
}

/// Gerrit prepends an XSSI guard before the JSON body.
fn strip_xssi_prefix(body: &str) -> &str {
    body.strip_prefix(")]}'").unwrap_or(body).trim_start()
}

fn parse_gerrit_time(s: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .with_context(|| format!("Invalid Gerrit timestamp: {}", s))?;
    Ok(Utc.from_utc_datetime(&naive))
}

fn build_query(project: &str, reviewers: &[String]) -> String {
    let mut query = format!("status:open project:{}", project);
    if !reviewers.is_empty() {
        let terms: Vec<String> = reviewers.iter().map(|r| format!("reviewer:{}", r)).collect();
        query.push_str(&format!(" ({})", terms.join(" OR ")));
    }
    query
}

impl GerritSource {
    pub fn new(host: String, ssl_verify: bool) -> Result<Self> {
        let http = http_client(ssl_verify).context("Failed to create HTTP client")?;
        Ok(Self { http, host })
    }

    fn convert(&self, change: GerritChange, project: &str) -> Result<ReviewRecord> {
        let time = parse_gerrit_time(&change.created)?;
        let updated_time = match &change.updated {
            Some(updated) => Some(parse_gerrit_time(updated)?),
            None => Some(time),
        };

        // Change messages arrive oldest-first.
        let last_comment = change
            .messages
            .into_iter()
            .last()
            .map(|m| {
                Ok::<Comment, anyhow::Error>(Comment {
                    author: m.author.map(GerritAccount::display).unwrap_or_default(),
                    created_at: parse_gerrit_time(&m.date)?,
                })
            })
            .transpose()?;

        Ok(ReviewRecord {
            service: ServiceKind::Gerrit,
            user: change.owner.display(),
            title: change.subject,
            url: format!("{}/c/{}/+/{}", self.host, project, change.number),
            repo_name: Some(project.to_string()),
            user_name: None,
            time,
            updated_time,
            comment_count: change.total_comment_count,
            last_comment,
            is_wip: change.work_in_progress,
            is_automated: false,
        })
    }
}

#[async_trait]
impl ReviewSource for GerritSource {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Gerrit
    }

    fn accepts_reviewers(&self) -> bool {
        true
    }

    async fn request_reviews(&self, request: &FetchRequest) -> Result<Vec<ReviewRecord>> {
        let project = request
            .full_repo()
            .context("gerrit target requires a project name")?;
        let query = build_query(&project, &request.reviewers);

        debug!(project = %project, query = %query, "Querying open changes");

        let mut params = vec![("q", query), ("o", "DETAILED_ACCOUNTS".to_string())];
        if request.show_last_comment {
            params.push(("o", "MESSAGES".to_string()));
        }

        let response = self
            .http
            .get(format!("{}/changes/", self.host))
            .query(&params)
            .send()
            .await
            .with_context(|| format!("Failed to query changes for {}", project))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gerrit API error ({}): {}", status, error_text);
        }

        let body = response.text().await.context("Failed to read change list")?;
        let changes: Vec<GerritChange> = serde_json::from_str(strip_xssi_prefix(&body))
            .context("Failed to parse change list")?;

        let mut records = Vec::new();
        for change in changes {
            records.push(self.convert(change, &project)?);
        }

        info!(project = %project, count = records.len(), "Fetched Gerrit changes");

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHANGES_BODY: &str = concat!(
        ")]}'\n",
        r#"[
            {
                "_number": 4242,
                "subject": "Tighten quota checks",
                "created": "2024-02-01 09:59:32.126000000",
                "updated": "2024-02-05 11:00:00.000000000",
                "owner": {"name": "Alice Adams", "username": "alice"},
                "total_comment_count": 3,
                "messages": [
                    {"author": {"username": "alice"}, "date": "2024-02-01 10:00:00.000000000"},
                    {"author": {"username": "zuul"}, "date": "2024-02-05 11:00:00.000000000"}
                ]
            },
            {
                "_number": 4243,
                "subject": "Experimental rework",
                "created": "2024-02-03 09:00:00.000000000",
                "work_in_progress": true,
                "owner": {"username": "bob"}
            }
        ]"#
    );

    #[test]
    fn test_strip_xssi_prefix() {
        assert_eq!(strip_xssi_prefix(")]}'\n[]"), "[]");
        assert_eq!(strip_xssi_prefix("[]"), "[]");
    }

    #[test]
    fn test_parse_gerrit_time() {
        let parsed = parse_gerrit_time("2024-02-01 09:59:32.126000000").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-02-01T09:59:32.126+00:00");
        assert!(parse_gerrit_time("yesterday").is_err());
    }

    #[test]
    fn test_build_query_with_reviewers() {
        assert_eq!(build_query("nova", &[]), "status:open project:nova");
        assert_eq!(
            build_query(
                "nova",
                &["alice".to_string(), "bob".to_string()]
            ),
            "status:open project:nova (reviewer:alice OR reviewer:bob)"
        );
    }

    #[tokio::test]
    async fn test_request_reviews_maps_changes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/changes/"))
            .and(query_param("q", "status:open project:nova"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(CHANGES_BODY, "application/json"),
            )
            .mount(&server)
            .await;

        let source = GerritSource::new(server.uri(), true).unwrap();
        let request = FetchRequest {
            user_name: Some("nova".to_string()),
            show_last_comment: true,
            ..Default::default()
        };

        let records = source.request_reviews(&request).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user, "alice");
        assert_eq!(records[0].title, "Tighten quota checks");
        assert_eq!(records[0].comment_count, 3);
        assert!(records[0].url.ends_with("/c/nova/+/4242"));
        let comment = records[0].last_comment.as_ref().unwrap();
        assert_eq!(comment.author, "zuul");

        assert!(records[1].is_wip);
        assert_eq!(records[1].updated_time, Some(records[1].time));
    }
}
