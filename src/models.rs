use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Hosting service kinds the aggregator can poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Github,
    Gitlab,
    Gerrit,
    Pagure,
    Phabricator,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Github => "github",
            ServiceKind::Gitlab => "gitlab",
            ServiceKind::Gerrit => "gerrit",
            ServiceKind::Pagure => "pagure",
            ServiceKind::Phabricator => "phabricator",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(ServiceKind::Github),
            "gitlab" => Ok(ServiceKind::Gitlab),
            "gerrit" => Ok(ServiceKind::Gerrit),
            "pagure" => Ok(ServiceKind::Pagure),
            "phabricator" => Ok(ServiceKind::Phabricator),
            other => Err(ConfigError::UnsupportedService(other.to_string())),
        }
    }
}

/// Output rendering style. `Irc` is internal to the IRC sink and cannot be
/// selected from the CLI or the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStyle {
    Oneline,
    Indented,
    Json,
    #[value(skip)]
    #[serde(skip)]
    Irc,
}

/// The most recent comment on a review item.
#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// The normalized, service-agnostic representation of one open review
/// request. Every source adapter produces these; nothing service-specific
/// crosses into the pipeline.
///
/// A record is immutable once its adapter constructs it, with one
/// exception: the classify stage may set `is_automated` exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewRecord {
    pub service: ServiceKind,
    /// Author/owner identity. Empty for services without per-item
    /// attribution (aggregate Phabricator queries).
    pub user: String,
    pub title: String,
    pub url: String,
    pub repo_name: Option<String>,
    pub user_name: Option<String>,
    /// When the review request was opened. Always present.
    pub time: DateTime<Utc>,
    /// Last modification. Adapters fall back to `time` when the service
    /// has no native value, so the `updated` sort stays total.
    pub updated_time: Option<DateTime<Utc>>,
    /// Total comment count, 0 when the service does not report one.
    pub comment_count: u64,
    pub last_comment: Option<Comment>,
    pub is_wip: bool,
    /// Set post-hoc by the classify stage, never by adapters.
    pub is_automated: bool,
}

impl ReviewRecord {
    /// Whether this record is marked work-in-progress, either by the
    /// service's native draft flag or by a title prefix convention.
    pub fn is_work_in_progress(&self) -> bool {
        if self.is_wip {
            return true;
        }
        let title = self.title.trim().to_lowercase();
        title.starts_with("wip:")
            || title.starts_with("[wip]")
            || title.starts_with("draft:")
            || title.starts_with("[draft]")
    }

    /// Render this record in the given style. `index` and `total` describe
    /// the record's position in the ordered batch; only the IRC style uses
    /// them.
    pub fn format(
        &self,
        style: OutputStyle,
        index: usize,
        total: usize,
        show_last_comment: bool,
    ) -> String {
        match style {
            OutputStyle::Oneline => self.format_oneline(show_last_comment),
            OutputStyle::Indented => self.format_indented(show_last_comment),
            OutputStyle::Json => serde_json::to_string_pretty(self).unwrap_or_default(),
            OutputStyle::Irc => format!(
                "({}/{}) {}",
                index + 1,
                total,
                self.format_irc(show_last_comment)
            ),
        }
    }

    fn who(&self) -> String {
        let mut who = String::new();
        if !self.user.is_empty() {
            who.push_str(&format!("@{} ", self.user));
        }
        if self.is_automated {
            who.push_str("[automated] ");
        }
        who
    }

    fn target(&self) -> String {
        match &self.repo_name {
            Some(repo) => repo.clone(),
            None => self.service.to_string(),
        }
    }

    fn comment_clause(&self, now: DateTime<Utc>) -> Option<String> {
        self.last_comment.as_ref().map(|c| {
            format!(
                "last commented by @{} {}",
                c.author,
                relative_age(c.created_at, now)
            )
        })
    }

    fn format_oneline(&self, show_last_comment: bool) -> String {
        let now = Utc::now();
        let mut line = format!(
            "{}filed '{}' in {} {} {}",
            self.who(),
            self.title,
            self.target(),
            self.url,
            relative_age(self.time, now)
        );
        if show_last_comment {
            if let Some(clause) = self.comment_clause(now) {
                line.push_str(", ");
                line.push_str(&clause);
            }
        }
        line
    }

    fn format_indented(&self, show_last_comment: bool) -> String {
        let now = Utc::now();
        let mut block = format!(
            "{}filed '{}'\n    in {}\n    {}\n    opened {}",
            self.who(),
            self.title,
            self.target(),
            self.url,
            relative_age(self.time, now)
        );
        if let Some(updated) = self.updated_time {
            if updated != self.time {
                block.push_str(&format!(", updated {}", relative_age(updated, now)));
            }
        }
        if show_last_comment {
            if let Some(clause) = self.comment_clause(now) {
                block.push_str(&format!("\n    {}", clause));
            }
        }
        block
    }

    fn format_irc(&self, show_last_comment: bool) -> String {
        let now = Utc::now();
        let mut line = format!(
            "{}filed \x02{}\x02 in {} {} {}",
            self.who(),
            self.title,
            self.target(),
            self.url,
            relative_age(self.time, now)
        );
        if show_last_comment {
            if let Some(clause) = self.comment_clause(now) {
                line.push_str(", ");
                line.push_str(&clause);
            }
        }
        line
    }
}

/// Human-readable age phrase for a past timestamp, e.g. "5 days ago".
pub fn relative_age(from: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(from);
    let minutes = delta.num_minutes();
    if minutes < 1 {
        return "just now".to_string();
    }

    let (count, unit) = if delta.num_days() >= 365 {
        (delta.num_days() / 365, "year")
    } else if delta.num_days() >= 30 {
        (delta.num_days() / 30, "month")
    } else if delta.num_days() >= 1 {
        (delta.num_days(), "day")
    } else if delta.num_hours() >= 1 {
        (delta.num_hours(), "hour")
    } else {
        (minutes, "minute")
    };

    if count == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", count, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_record(title: &str) -> ReviewRecord {
        ReviewRecord {
            service: ServiceKind::Github,
            user: "alice".to_string(),
            title: title.to_string(),
            url: "https://github.com/org/repo/pull/1".to_string(),
            repo_name: Some("org/repo".to_string()),
            user_name: Some("org".to_string()),
            time: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            updated_time: None,
            comment_count: 0,
            last_comment: None,
            is_wip: false,
            is_automated: false,
        }
    }

    #[test]
    fn test_service_kind_round_trip() {
        for name in ["github", "gitlab", "gerrit", "pagure", "phabricator"] {
            let kind: ServiceKind = name.parse().unwrap();
            assert_eq!(kind.as_str(), name);
        }
    }

    #[test]
    fn test_service_kind_unknown() {
        let err = "bitbucket".parse::<ServiceKind>().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedService(name) if name == "bitbucket"));
    }

    #[test]
    fn test_wip_from_title_prefix() {
        assert!(make_record("WIP: new feature").is_work_in_progress());
        assert!(make_record("[wip] new feature").is_work_in_progress());
        assert!(make_record("Draft: new feature").is_work_in_progress());
        assert!(!make_record("Fix wip handling").is_work_in_progress());
    }

    #[test]
    fn test_wip_from_flag() {
        let mut record = make_record("Ready feature");
        assert!(!record.is_work_in_progress());
        record.is_wip = true;
        assert!(record.is_work_in_progress());
    }

    #[test]
    fn test_oneline_contains_core_fields() {
        let line = make_record("Fix parser").format(OutputStyle::Oneline, 0, 1, false);
        assert!(line.starts_with("@alice filed 'Fix parser' in org/repo"));
        assert!(line.contains("https://github.com/org/repo/pull/1"));
    }

    #[test]
    fn test_oneline_empty_user_has_no_handle() {
        let mut record = make_record("Fix parser");
        record.user = String::new();
        let line = record.format(OutputStyle::Oneline, 0, 1, false);
        assert!(line.starts_with("filed 'Fix parser'"));
    }

    #[test]
    fn test_json_style_is_valid_object() {
        let rendered = make_record("Fix parser").format(OutputStyle::Json, 0, 1, false);
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["service"], "github");
        assert_eq!(value["user"], "alice");
        assert_eq!(value["is_automated"], false);
    }

    #[test]
    fn test_irc_style_carries_position() {
        let line = make_record("Fix parser").format(OutputStyle::Irc, 2, 25, false);
        assert!(line.starts_with("(3/25) "));
    }

    #[test]
    fn test_comment_clause_only_when_requested() {
        let mut record = make_record("Fix parser");
        record.last_comment = Some(Comment {
            author: "bob".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap(),
        });

        let without = record.format(OutputStyle::Oneline, 0, 1, false);
        assert!(!without.contains("last commented"));

        let with = record.format(OutputStyle::Oneline, 0, 1, true);
        assert!(with.contains("last commented by @bob"));
    }

    #[test]
    fn test_relative_age_units() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let cases = [
            (now - chrono::Duration::minutes(30), "30 minutes ago"),
            (now - chrono::Duration::hours(5), "5 hours ago"),
            (now - chrono::Duration::days(1), "1 day ago"),
            (now - chrono::Duration::days(12), "12 days ago"),
            (now - chrono::Duration::days(65), "2 months ago"),
            (now - chrono::Duration::days(800), "2 years ago"),
        ];
        for (from, expected) in cases {
            assert_eq!(relative_age(from, now), expected);
        }
    }

    #[test]
    fn test_relative_age_just_now() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(relative_age(now, now), "just now");
    }
}
