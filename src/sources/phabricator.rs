use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::{http_client, FetchRequest, ReviewSource};
use crate::models::{ReviewRecord, ServiceKind};

/// Phabricator differential source, speaking the conduit API. This is the
/// aggregate-query adapter: one call covers every configured repository
/// callsign, so the driver hands it the whole `repos` list at once.
///
/// Aggregate revision queries carry no per-item user attribution, so
/// `user` is left empty on every record.
#[derive(Debug)]
pub struct PhabricatorSource {
    http: reqwest::Client,
    host: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ConduitResponse<T> {
    result: Option<T>,
    error_code: Option<String>,
    error_info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    phid: String,
}

#[derive(Debug, Deserialize)]
struct Revision {
    id: u64,
    fields: RevisionFields,
}

#[derive(Debug, Deserialize)]
struct RevisionFields {
    title: String,
    #[serde(rename = "dateCreated")]
    date_created: i64,
    #[serde(rename = "dateModified")]
    date_modified: Option<i64>,
    #[serde(rename = "isDraft", default)]
    is_draft: bool,
}

/// Open-ish revision states; drafts are fetched and left to the WIP filter.
const OPEN_STATUSES: [&str; 4] = ["needs-review", "needs-revision", "accepted", "draft"];

fn epoch_to_utc(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .with_context(|| format!("Epoch timestamp out of range: {}", secs))
}

impl PhabricatorSource {
    pub fn new(host: String, token: String, ssl_verify: bool) -> Result<Self> {
        let http = http_client(ssl_verify).context("Failed to create HTTP client")?;
        Ok(Self { http, host, token })
    }

    async fn conduit<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        mut form: Vec<(String, String)>,
    ) -> Result<T> {
        form.push(("api.token".to_string(), self.token.clone()));

        let response = self
            .http
            .post(format!("{}/api/{}", self.host, endpoint))
            .form(&form)
            .send()
            .await
            .with_context(|| format!("Failed to call conduit endpoint {}", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Phabricator API error ({}): {}", status, error_text);
        }

        let envelope: ConduitResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", endpoint))?;

        if let Some(code) = envelope.error_code {
            anyhow::bail!(
                "Conduit error {}: {}",
                code,
                envelope.error_info.unwrap_or_default()
            );
        }

        envelope
            .result
            .with_context(|| format!("Empty {} response", endpoint))
    }

    /// Resolves repository callsigns to PHIDs for the revision query.
    async fn repository_phids(&self, callsigns: &[String]) -> Result<Vec<String>> {
        let form: Vec<(String, String)> = callsigns
            .iter()
            .enumerate()
            .map(|(i, cs)| (format!("constraints[callsigns][{}]", i), cs.clone()))
            .collect();

        let result: SearchResult<Repository> =
            self.conduit("diffusion.repository.search", form).await?;

        Ok(result.data.into_iter().map(|r| r.phid).collect())
    }

    fn convert(&self, revision: Revision) -> Result<ReviewRecord> {
        let time = epoch_to_utc(revision.fields.date_created)?;
        let updated_time = match revision.fields.date_modified {
            Some(secs) => Some(epoch_to_utc(secs)?),
            None => Some(time),
        };

        Ok(ReviewRecord {
            service: ServiceKind::Phabricator,
            user: String::new(),
            title: revision.fields.title,
            url: format!("{}/D{}", self.host, revision.id),
            repo_name: None,
            user_name: None,
            time,
            updated_time,
            comment_count: 0,
            last_comment: None,
            is_wip: revision.fields.is_draft,
            is_automated: false,
        })
    }
}

#[async_trait]
impl ReviewSource for PhabricatorSource {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Phabricator
    }

    fn accepts_repo_list(&self) -> bool {
        true
    }

    async fn request_reviews(&self, request: &FetchRequest) -> Result<Vec<ReviewRecord>> {
        let mut form: Vec<(String, String)> = OPEN_STATUSES
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("constraints[statuses][{}]", i), s.to_string()))
            .collect();

        if !request.repos.is_empty() {
            let phids = self.repository_phids(&request.repos).await?;
            debug!(
                callsigns = request.repos.len(),
                resolved = phids.len(),
                "Resolved repository callsigns"
            );
            for (i, phid) in phids.iter().enumerate() {
                form.push((format!("constraints[repositoryPHIDs][{}]", i), phid.clone()));
            }
        }

        let result: SearchResult<Revision> =
            self.conduit("differential.revision.search", form).await?;

        let mut records = Vec::new();
        for revision in result.data {
            records.push(self.convert(revision)?);
        }

        info!(count = records.len(), "Fetched Phabricator revisions");

        Ok(records)
    }
}
