use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::errors::ConfigError;
use crate::models::{OutputStyle, ServiceKind};
use crate::pipeline::{SortKey, DEFAULT_BOTS};

/// Main configuration structure, read once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub arguments: Arguments,
    #[serde(default)]
    pub git_services: Vec<Target>,
}

/// Defaults for run arguments; every field can be overridden from the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Arguments {
    pub age: Option<String>,
    pub format: Option<OutputStyle>,
    pub sort: Option<SortKey>,
    pub reverse: bool,
    pub show_last_comment: bool,
    pub tag_bots: bool,
    /// Automation identities; overrides the built-in list when set.
    pub bots: Option<Vec<String>>,
    pub insecure: bool,
    pub output: Option<PathBuf>,
    pub email: Option<EmailConfig>,
    pub irc: Option<IrcConfig>,
}

impl Arguments {
    /// The automation identity list, configured or built-in.
    pub fn bot_identities(&self) -> Vec<String> {
        match &self.bots {
            Some(bots) => bots.clone(),
            None => DEFAULT_BOTS.iter().map(|b| b.to_string()).collect(),
        }
    }
}

/// One configured service target: the unit of fetch isolation.
#[derive(Debug, Clone, Deserialize)]
pub struct Target {
    /// Service type; required, validated against the supported set before
    /// any fetch happens.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Repository entries; `owner/repo` (or deeper paths), or a bare owner
    /// for user-wide polling. Absent means service-wide where supported.
    pub repos: Option<Vec<String>>,
    pub host: Option<String>,
    /// Opaque credential, or an `ENV.<VAR>` indirection resolved at load
    /// time.
    pub token: Option<String>,
    #[serde(default = "default_true")]
    pub ssl_verify: bool,
    /// Gerrit only; other services ignore it.
    #[serde(default)]
    pub reviewers: Vec<String>,
}

/// Email sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub from: String,
    pub to: Vec<String>,
    pub subject: Option<String>,
}

/// IRC sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IrcConfig {
    pub server: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    #[serde(default = "default_nick")]
    pub nick: String,
    pub channels: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_smtp_port() -> u16 {
    25
}

fn default_irc_port() -> u16 {
    6667
}

fn default_nick() -> String {
    "review-radar".to_string()
}

/// Resolves `ENV.<VAR>` token indirections against the process
/// environment; literal tokens pass through untouched.
fn resolve_token(raw: &str) -> Result<String, ConfigError> {
    match raw.strip_prefix("ENV.") {
        Some(var) => {
            std::env::var(var).map_err(|_| ConfigError::MissingEnvToken(var.to_string()))
        }
        None => Ok(raw.to_string()),
    }
}

impl Config {
    /// Load and validate configuration from a YAML file. A missing file is
    /// fatal: with no targets there is nothing to poll.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;

        let mut config: Config =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Unparsable {
                path: path.display().to_string(),
                source,
            })?;

        config.validate()?;

        info!(
            path = %path.display(),
            targets = config.git_services.len(),
            "Loaded configuration"
        );

        Ok(config)
    }

    /// Checks every target and resolves token indirections. Runs before
    /// any fetch, so a bad target aborts the whole run up front.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        for (index, target) in self.git_services.iter_mut().enumerate() {
            let kind = target
                .kind
                .as_deref()
                .ok_or(ConfigError::MissingField {
                    index,
                    field: "type",
                })?;
            kind.parse::<ServiceKind>()?;

            if let Some(token) = &target.token {
                target.token = Some(resolve_token(token)?);
            }
        }
        Ok(())
    }
}
