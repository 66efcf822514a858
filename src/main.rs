use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use review_radar::{
    classify_automated, filter_age, get_service, remove_wip, render_batch, sort_records,
    write_file, Age, Config, EmailSink, FetchRequest, IrcSink, OutputStyle, ReviewRecord,
    SortKey, SourceSettings, Target,
};

#[derive(Parser)]
#[command(name = "review-radar")]
#[command(about = "Aggregates open review requests across code hosting services")]
struct Cli {
    /// Path to the YAML config file (default: ~/.review-radar/config.yaml)
    #[arg(long, env = "REVIEW_RADAR_CONFIG")]
    config: Option<PathBuf>,

    /// Output style
    #[arg(long, value_enum)]
    format: Option<OutputStyle>,

    /// Sort key
    #[arg(long, value_enum)]
    sort: Option<SortKey>,

    /// Reverse the sort order
    #[arg(long)]
    reverse: bool,

    /// Drop records older than this, e.g. "2w", "3d" or "2w 3d"
    #[arg(long)]
    age: Option<String>,

    /// Fetch and show each record's most recent comment
    #[arg(long)]
    show_last_comment: bool,

    /// Tag records opened by known automation accounts
    #[arg(long)]
    tag_bots: bool,

    /// Skip TLS certificate validation for every target
    #[arg(long)]
    insecure: bool,

    /// Write the report to a file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

/// Effective run settings: CLI flags override the config file's
/// `arguments` section, which overrides built-in defaults.
struct RunOptions {
    style: OutputStyle,
    sort: SortKey,
    reverse: bool,
    age: Option<Age>,
    show_last_comment: bool,
    tag_bots: bool,
    bots: Vec<String>,
    insecure: bool,
    output: Option<PathBuf>,
}

impl RunOptions {
    fn merge(cli: &Cli, config: &Config) -> Result<Self> {
        let arguments = &config.arguments;

        let age = match cli.age.as_deref().or(arguments.age.as_deref()) {
            Some(raw) => Some(raw.parse::<Age>()?),
            None => None,
        };

        Ok(Self {
            style: cli
                .format
                .or(arguments.format)
                .unwrap_or(OutputStyle::Oneline),
            sort: cli.sort.or(arguments.sort).unwrap_or(SortKey::Submitted),
            reverse: cli.reverse || arguments.reverse,
            age,
            show_last_comment: cli.show_last_comment || arguments.show_last_comment,
            tag_bots: cli.tag_bots || arguments.tag_bots,
            bots: arguments.bot_identities(),
            insecure: cli.insecure || arguments.insecure,
            output: cli.output.clone().or_else(|| arguments.output.clone()),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.debug {
        "review_radar=debug"
    } else {
        "review_radar=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)?;
    let options = RunOptions::merge(&cli, &config)?;

    let mut records = fetch_all(&config.git_services, &options).await?;

    records = remove_wip(records);
    if options.tag_bots {
        classify_automated(&mut records, &options.bots);
    }
    if let Some(age) = options.age {
        records = filter_age(records, age, Utc::now());
    }
    sort_records(&mut records, options.sort, options.reverse);

    if records.is_empty() {
        info!("No review requests after filtering; nothing to deliver");
        return Ok(());
    }

    dispatch(&records, &config, &options).await?;

    Ok(())
}

/// Fetches every configured target, isolating failures: one broken target
/// is logged and skipped, and the run only fails when every target failed.
/// Targets are fetched sequentially, so the merged order always follows
/// the configuration.
async fn fetch_all(targets: &[Target], options: &RunOptions) -> Result<Vec<ReviewRecord>> {
    let mut all = Vec::new();
    let mut failed = 0usize;

    for target in targets {
        match fetch_target(target, options).await {
            Ok(mut records) => all.append(&mut records),
            Err(err) => {
                failed += 1;
                warn!(
                    service = target.kind.as_deref().unwrap_or("?"),
                    error = %format!("{:#}", err),
                    "Target fetch failed; continuing with remaining targets"
                );
            }
        }
    }

    if !targets.is_empty() && failed == targets.len() {
        anyhow::bail!("all {} configured targets failed", failed);
    }

    Ok(all)
}

async fn fetch_target(target: &Target, options: &RunOptions) -> Result<Vec<ReviewRecord>> {
    let kind = target.kind.as_deref().context("target has no type")?;

    let settings = SourceSettings {
        host: target.host.clone(),
        token: target.token.clone(),
        ssl_verify: target.ssl_verify && !options.insecure,
    };
    let source = get_service(kind, &settings)?;

    if !target.reviewers.is_empty() && !source.accepts_reviewers() {
        warn!(
            service = kind,
            "`reviewers` is not supported by this service; ignoring"
        );
    }

    let repos = target.repos.clone().unwrap_or_default();
    let mut records = Vec::new();

    if source.accepts_repo_list() {
        // Aggregate-call adapters take the whole repo list at once.
        let request = FetchRequest {
            repos,
            show_last_comment: options.show_last_comment,
            ..Default::default()
        };
        records.extend(source.request_reviews(&request).await?);
    } else if repos.is_empty() {
        anyhow::bail!("{} target has no repos configured", kind);
    } else {
        for entry in &repos {
            let (user_name, repo_name) = split_repo(entry);
            let request = FetchRequest {
                user_name: Some(user_name.to_string()),
                repo_name: repo_name.map(|r| r.to_string()),
                repos: Vec::new(),
                show_last_comment: options.show_last_comment,
                reviewers: if source.accepts_reviewers() {
                    target.reviewers.clone()
                } else {
                    Vec::new()
                },
            };
            records.extend(source.request_reviews(&request).await?);
        }
    }

    Ok(records)
}

/// Sink priority: email, then IRC, then file or stdout. Exactly one fires.
async fn dispatch(records: &[ReviewRecord], config: &Config, options: &RunOptions) -> Result<()> {
    if let Some(email) = &config.arguments.email {
        EmailSink::new(email).send(records, options.show_last_comment)?;
        return Ok(());
    }

    if let Some(irc) = &config.arguments.irc {
        IrcSink::new(irc)
            .send(records, options.show_last_comment)
            .await?;
        return Ok(());
    }

    let rendered = render_batch(records, options.style, options.show_last_comment);
    match &options.output {
        Some(path) => write_file(path, &rendered)?,
        None => println!("{}", rendered),
    }

    Ok(())
}

/// Splits a configured repo entry into owner and repository parts. A bare
/// entry with no slash is an owner-only (user-wide) target.
fn split_repo(entry: &str) -> (&str, Option<&str>) {
    match entry.split_once('/') {
        Some((owner, rest)) => (owner, Some(rest)),
        None => (entry, None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").context("HOME is not set; pass --config explicitly")?;
    Ok(PathBuf::from(home).join(".review-radar").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_repo() {
        assert_eq!(split_repo("org/repo"), ("org", Some("repo")));
        assert_eq!(split_repo("group/sub/project"), ("group", Some("sub/project")));
        assert_eq!(split_repo("alice"), ("alice", None));
    }

    #[test]
    fn test_merge_cli_overrides_config() {
        let cli = Cli::parse_from([
            "review-radar",
            "--format",
            "json",
            "--reverse",
            "--age",
            "3d",
        ]);
        let config: Config = serde_yaml::from_str(
            r#"
arguments:
  format: indented
  sort: commented
  age: 2w
git_services: []
"#,
        )
        .unwrap();

        let options = RunOptions::merge(&cli, &config).unwrap();

        assert_eq!(options.style, OutputStyle::Json);
        assert_eq!(options.sort, SortKey::Commented);
        assert!(options.reverse);
        assert_eq!(options.age, Some("3d".parse().unwrap()));
    }

    #[test]
    fn test_merge_defaults() {
        let cli = Cli::parse_from(["review-radar"]);
        let config: Config = serde_yaml::from_str("git_services: []").unwrap();

        let options = RunOptions::merge(&cli, &config).unwrap();

        assert_eq!(options.style, OutputStyle::Oneline);
        assert_eq!(options.sort, SortKey::Submitted);
        assert!(!options.reverse);
        assert!(options.age.is_none());
        assert_eq!(options.bots.len(), 3);
    }

    #[test]
    fn test_merge_rejects_bad_age() {
        let cli = Cli::parse_from(["review-radar", "--age", "fortnight"]);
        let config: Config = serde_yaml::from_str("git_services: []").unwrap();

        assert!(RunOptions::merge(&cli, &config).is_err());
    }
}
