use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use serde::Deserialize;
use tracing::debug;

use crate::errors::ConfigError;
use crate::models::ReviewRecord;

/// Built-in automation identities. Matched case-insensitively as substrings
/// of the record's `user`; overridable via `arguments.bots` in the config.
pub const DEFAULT_BOTS: [&str; 3] = [
    "renovate[bot]",
    "dependabot[bot]",
    "red-hat-konflux[bot]",
];

/// Sort key selector. The variants here are the single source of truth for
/// both CLI/config parsing and the sort itself, so the advertised choices
/// and the failure set cannot drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Submitted,
    Updated,
    Commented,
}

impl FromStr for SortKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(SortKey::Submitted),
            "updated" => Ok(SortKey::Updated),
            "commented" => Ok(SortKey::Commented),
            other => Err(ConfigError::UnsupportedSortKey(other.to_string())),
        }
    }
}

/// A parsed age bound, e.g. "2w 3d". Records opened before `now - age`
/// are dropped by [`filter_age`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Age {
    minutes: i64,
}

impl Age {
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::minutes(self.minutes)
    }
}

impl FromStr for Age {
    type Err = ConfigError;

    /// Parses whitespace-separated terms of `<count><unit>` where unit is
    /// `w`, `d`, `h` or `m`. Terms accumulate: "2w 3d" is 17 days.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidAge(s.to_string());

        let mut minutes: i64 = 0;
        let mut seen = false;
        for term in s.split_whitespace() {
            let unit = term.chars().last().ok_or_else(|| invalid())?;
            let count = &term[..term.len() - unit.len_utf8()];
            let count: i64 = count.parse().map_err(|_| invalid())?;
            if count < 0 {
                return Err(invalid());
            }
            let per_unit = match unit {
                'w' => 7 * 24 * 60,
                'd' => 24 * 60,
                'h' => 60,
                'm' => 1,
                _ => return Err(invalid()),
            };
            minutes += count * per_unit;
            seen = true;
        }

        if !seen {
            return Err(invalid());
        }
        Ok(Age { minutes })
    }
}

/// Drops every work-in-progress record. Pure and order-preserving among
/// survivors, hence idempotent.
pub fn remove_wip(records: Vec<ReviewRecord>) -> Vec<ReviewRecord> {
    let before = records.len();
    let kept: Vec<ReviewRecord> = records
        .into_iter()
        .filter(|r| !r.is_work_in_progress())
        .collect();
    debug!(dropped = before - kept.len(), "Removed WIP records");
    kept
}

/// Tags records whose `user` contains one of the given bot identities,
/// case-insensitively. Records with an empty `user` are never tagged.
pub fn classify_automated(records: &mut [ReviewRecord], bots: &[String]) {
    let bots: Vec<String> = bots.iter().map(|b| b.to_lowercase()).collect();
    for record in records.iter_mut() {
        if record.user.is_empty() {
            continue;
        }
        let user = record.user.to_lowercase();
        if bots.iter().any(|b| user.contains(b)) {
            record.is_automated = true;
        }
    }
}

/// Central age cut against the canonical `time` field. Every service gets
/// identical age-since-open semantics; adapters never filter by age.
pub fn filter_age(records: Vec<ReviewRecord>, age: Age, now: DateTime<Utc>) -> Vec<ReviewRecord> {
    let cutoff = age.cutoff(now);
    let before = records.len();
    let kept: Vec<ReviewRecord> = records.into_iter().filter(|r| r.time >= cutoff).collect();
    debug!(
        dropped = before - kept.len(),
        cutoff = %cutoff,
        "Applied age filter"
    );
    kept
}

/// Orders `None` after every `Some`, so records missing the key sort last
/// in ascending order. No sentinel timestamps involved.
fn cmp_optional(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn sort_value(record: &ReviewRecord, key: SortKey) -> Option<DateTime<Utc>> {
    match key {
        SortKey::Submitted => Some(record.time),
        SortKey::Updated => record.updated_time,
        SortKey::Commented => record.last_comment.as_ref().map(|c| c.created_at),
    }
}

/// Stable sort by the selected key. `reverse` swaps the comparator's
/// operands rather than reversing the result, so ties keep their input
/// order in both directions. With `reverse` and the `commented` key,
/// comment-less records surface first; that inherited property is kept
/// deliberately.
pub fn sort_records(records: &mut [ReviewRecord], key: SortKey, reverse: bool) {
    records.sort_by(|a, b| {
        let (a, b) = (sort_value(a, key), sort_value(b, key));
        if reverse {
            cmp_optional(b, a)
        } else {
            cmp_optional(a, b)
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Comment, ServiceKind};
    use chrono::TimeZone;

    fn record_at(user: &str, title: &str, day: u32) -> ReviewRecord {
        ReviewRecord {
            service: ServiceKind::Gitlab,
            user: user.to_string(),
            title: title.to_string(),
            url: format!("https://example.com/{}", title),
            repo_name: Some("org/repo".to_string()),
            user_name: Some("org".to_string()),
            time: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            updated_time: None,
            comment_count: 0,
            last_comment: None,
            is_wip: false,
            is_automated: false,
        }
    }

    #[test]
    fn test_age_parse_single_term() {
        let age: Age = "2w".parse().unwrap();
        assert_eq!(age.minutes, 14 * 24 * 60);
    }

    #[test]
    fn test_age_parse_compound() {
        let age: Age = "2w 3d".parse().unwrap();
        assert_eq!(age.minutes, 17 * 24 * 60);

        let age: Age = "1d 12h 30m".parse().unwrap();
        assert_eq!(age.minutes, 36 * 60 + 30);
    }

    #[test]
    fn test_age_parse_rejects_garbage() {
        for bad in ["", "fortnight", "3x", "w", "-2d"] {
            assert!(
                matches!(bad.parse::<Age>(), Err(ConfigError::InvalidAge(_))),
                "expected InvalidAge for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!("submitted".parse::<SortKey>().unwrap(), SortKey::Submitted);
        assert_eq!("updated".parse::<SortKey>().unwrap(), SortKey::Updated);
        assert_eq!("commented".parse::<SortKey>().unwrap(), SortKey::Commented);
        assert!(matches!(
            "alphabetical".parse::<SortKey>(),
            Err(ConfigError::UnsupportedSortKey(_))
        ));
    }

    #[test]
    fn test_remove_wip_is_idempotent() {
        let records = vec![
            record_at("alice", "WIP: thing", 1),
            record_at("bob", "Real change", 2),
            {
                let mut r = record_at("carol", "Flagged draft", 3);
                r.is_wip = true;
                r
            },
        ];

        let once = remove_wip(records);
        assert_eq!(once.len(), 1);
        assert_eq!(once[0].title, "Real change");

        let twice = remove_wip(once.clone());
        assert_eq!(twice.len(), once.len());
    }

    #[test]
    fn test_classify_automated_known_bots() {
        let bots: Vec<String> = DEFAULT_BOTS.iter().map(|b| b.to_string()).collect();
        let mut records = vec![
            record_at("Red-Hat-Konflux[bot]", "Update pipeline", 1),
            record_at("alice", "Fix bug", 2),
            record_at("", "No attribution", 3),
            record_at("renovate[bot]", "Bump deps", 4),
        ];

        classify_automated(&mut records, &bots);

        assert!(records[0].is_automated);
        assert!(!records[1].is_automated);
        assert!(!records[2].is_automated);
        assert!(records[3].is_automated);
    }

    #[test]
    fn test_classify_automated_custom_list() {
        let bots = vec!["ci-runner".to_string()];
        let mut records = vec![
            record_at("my-ci-runner-7", "Nightly rebase", 1),
            record_at("renovate[bot]", "Bump deps", 2),
        ];

        classify_automated(&mut records, &bots);

        assert!(records[0].is_automated);
        assert!(!records[1].is_automated);
    }

    #[test]
    fn test_filter_age_drops_old_records() {
        let now = Utc.with_ymd_and_hms(2024, 1, 20, 12, 0, 0).unwrap();
        let age: Age = "1w".parse().unwrap();
        let records = vec![
            record_at("alice", "old", 1),
            record_at("bob", "fresh", 18),
        ];

        let kept = filter_age(records, age, now);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "fresh");
    }

    #[test]
    fn test_sort_submitted_ascending() {
        let mut records = vec![
            record_at("a", "day1", 1),
            record_at("b", "day3", 3),
            record_at("c", "day2", 2),
        ];

        sort_records(&mut records, SortKey::Submitted, false);

        let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["day1", "day2", "day3"]);
        assert!(records.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn test_sort_submitted_descending() {
        let mut records = vec![
            record_at("a", "day1", 1),
            record_at("b", "day3", 3),
            record_at("c", "day2", 2),
        ];

        sort_records(&mut records, SortKey::Submitted, true);

        assert!(records.windows(2).all(|w| w[0].time >= w[1].time));
    }

    #[test]
    fn test_sort_is_stable_on_ties() {
        let mut records = vec![
            record_at("first", "same day", 5),
            record_at("second", "same day", 5),
            record_at("third", "same day", 5),
        ];

        sort_records(&mut records, SortKey::Submitted, false);
        let users: Vec<&str> = records.iter().map(|r| r.user.as_str()).collect();
        assert_eq!(users, ["first", "second", "third"]);

        sort_records(&mut records, SortKey::Submitted, true);
        let users: Vec<&str> = records.iter().map(|r| r.user.as_str()).collect();
        assert_eq!(users, ["first", "second", "third"]);
    }

    #[test]
    fn test_sort_commented_places_commentless_last() {
        let mut commented = record_at("a", "has comment", 1);
        commented.last_comment = Some(Comment {
            author: "bob".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap(),
        });
        let silent = record_at("b", "no comment", 2);

        let mut records = vec![silent.clone(), commented.clone()];
        sort_records(&mut records, SortKey::Commented, false);
        assert_eq!(records[0].title, "has comment");
        assert_eq!(records[1].title, "no comment");
    }

    #[test]
    fn test_sort_commented_reversed_places_commentless_first() {
        let mut commented = record_at("a", "has comment", 1);
        commented.last_comment = Some(Comment {
            author: "bob".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap(),
        });
        let silent = record_at("b", "no comment", 2);

        let mut records = vec![commented, silent];
        sort_records(&mut records, SortKey::Commented, true);
        assert_eq!(records[0].title, "no comment");
        assert_eq!(records[1].title, "has comment");
    }

    #[test]
    fn test_sort_updated_missing_values_last() {
        let mut touched = record_at("a", "touched", 1);
        touched.updated_time = Some(Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap());
        let untouched = record_at("b", "untouched", 2);

        let mut records = vec![untouched, touched];
        sort_records(&mut records, SortKey::Updated, false);
        assert_eq!(records[0].title, "touched");
        assert_eq!(records[1].title, "untouched");
    }
}
