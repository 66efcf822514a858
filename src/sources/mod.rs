pub mod gerrit;
pub mod github;
pub mod gitlab;
pub mod pagure;
pub mod phabricator;

pub use gerrit::GerritSource;
pub use github::GithubSource;
pub use gitlab::GitlabSource;
pub use pagure::PagureSource;
pub use phabricator::PhabricatorSource;

use anyhow::Result;
use async_trait::async_trait;

use crate::errors::ConfigError;
use crate::models::{ReviewRecord, ServiceKind};

/// One fetch call against a source adapter. Ordinary adapters receive
/// `user_name`/`repo_name` and one call per repository; adapters with
/// [`ReviewSource::accepts_repo_list`] receive the whole `repos` list in a
/// single aggregate call.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub user_name: Option<String>,
    pub repo_name: Option<String>,
    pub repos: Vec<String>,
    /// Whether to populate `last_comment` (may cost an extra fetch per item).
    pub show_last_comment: bool,
    /// Honored only by adapters with [`ReviewSource::accepts_reviewers`].
    pub reviewers: Vec<String>,
}

impl FetchRequest {
    /// Full repository path reassembled from the configured target entry
    /// (`owner/repo`, or deeper paths for services with nested namespaces).
    pub fn full_repo(&self) -> Option<String> {
        match (&self.user_name, &self.repo_name) {
            (Some(user), Some(repo)) => Some(format!("{}/{}", user, repo)),
            (Some(user), None) => Some(user.clone()),
            (None, Some(repo)) => Some(repo.clone()),
            (None, None) => None,
        }
    }
}

/// Polymorphic review-source capability. One implementation per hosting
/// service; each maps service objects into [`ReviewRecord`]s and leaks no
/// service-specific types past this boundary.
///
/// Calling conventions are queried through the capability flags, never by
/// inspecting concrete adapter types.
#[async_trait]
pub trait ReviewSource: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ServiceKind;

    /// Whether this adapter honors `FetchRequest::reviewers`.
    fn accepts_reviewers(&self) -> bool {
        false
    }

    /// Whether this adapter takes the whole repository list in one call.
    fn accepts_repo_list(&self) -> bool {
        false
    }

    async fn request_reviews(&self, request: &FetchRequest) -> Result<Vec<ReviewRecord>>;
}

/// Connection settings for constructing a source adapter from one
/// configured target.
#[derive(Debug, Clone, Default)]
pub struct SourceSettings {
    pub host: Option<String>,
    pub token: Option<String>,
    pub ssl_verify: bool,
}

impl SourceSettings {
    fn host_or(&self, default: &str) -> String {
        let host = self.host.as_deref().unwrap_or(default);
        host.trim_end_matches('/').to_string()
    }

    fn require_host(&self, service: &'static str) -> Result<String, ConfigError> {
        match &self.host {
            Some(host) => Ok(host.trim_end_matches('/').to_string()),
            None => Err(ConfigError::MissingServiceField {
                service,
                field: "host",
            }),
        }
    }

    fn require_token(&self, service: &'static str) -> Result<String, ConfigError> {
        match &self.token {
            Some(token) => Ok(token.clone()),
            None => Err(ConfigError::MissingServiceField {
                service,
                field: "token",
            }),
        }
    }
}

/// Constructs the adapter for a service-type string. Unknown types fail
/// with [`ConfigError::UnsupportedService`] before any network activity.
/// Construction is stateless; callers get a fresh instance per call.
pub fn get_service(type_name: &str, settings: &SourceSettings) -> Result<Box<dyn ReviewSource>> {
    let kind: ServiceKind = type_name.parse::<ServiceKind>()?;

    let source: Box<dyn ReviewSource> = match kind {
        ServiceKind::Github => Box::new(GithubSource::new(
            settings.token.clone(),
            settings.ssl_verify,
        )?),
        ServiceKind::Gitlab => Box::new(GitlabSource::new(
            settings.host_or("https://gitlab.com"),
            settings.token.clone(),
            settings.ssl_verify,
        )?),
        ServiceKind::Gerrit => Box::new(GerritSource::new(
            settings.require_host("gerrit")?,
            settings.ssl_verify,
        )?),
        ServiceKind::Pagure => Box::new(PagureSource::new(
            settings.host_or("https://pagure.io"),
            settings.token.clone(),
            settings.ssl_verify,
        )?),
        ServiceKind::Phabricator => Box::new(PhabricatorSource::new(
            settings.require_host("phabricator")?,
            settings.require_token("phabricator")?,
            settings.ssl_verify,
        )?),
    };

    Ok(source)
}

/// Shared HTTP client builder; `ssl_verify = false` disables certificate
/// validation for hosts with private CAs.
pub(crate) fn http_client(ssl_verify: bool) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("review-radar/", env!("CARGO_PKG_VERSION")))
        .danger_accept_invalid_certs(!ssl_verify)
        .build()
}
