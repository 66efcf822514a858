use lettre::message::header::ContentType;
use lettre::{Message, SmtpTransport, Transport};
use minijinja::{context, Environment};
use tracing::info;

use crate::config::EmailConfig;
use crate::errors::SinkError;
use crate::models::ReviewRecord;

/// The whole ordered batch goes into one HTML document and one message;
/// email is the non-truncated channel.
const EMAIL_TEMPLATE: &str = r#"<html>
  <body>
    <h2>{{ total }} open review request{% if total != 1 %}s{% endif %}</h2>
    <ul>
    {% for record in records %}
      <li>
        {% if record.user %}<b>@{{ record.user }}</b>{% endif %}
        {% if record.is_automated %}<i>[automated]</i>{% endif %}
        <a href="{{ record.url }}">{{ record.title }}</a>
        {% if record.repo_name %}in {{ record.repo_name }}{% endif %}
        <small>opened {{ record.time }}</small>
        {% if show_last_comment and record.last_comment %}
        <br/><small>last comment by @{{ record.last_comment.author }} at {{ record.last_comment.created_at }}</small>
        {% endif %}
      </li>
    {% endfor %}
    </ul>
  </body>
</html>
"#;

/// Email sink: renders the batch through the digest template and delivers
/// it as a single SMTP message.
pub struct EmailSink {
    config: EmailConfig,
}

impl EmailSink {
    pub fn new(config: &EmailConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn send(
        &self,
        records: &[ReviewRecord],
        show_last_comment: bool,
    ) -> Result<(), SinkError> {
        let html = render_digest(records, show_last_comment)?;
        let subject = self
            .config
            .subject
            .clone()
            .unwrap_or_else(|| format!("{} open review requests", records.len()));

        let mut builder = Message::builder()
            .from(self.config.from.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_HTML);
        for recipient in &self.config.to {
            builder = builder.to(recipient.parse()?);
        }
        let message = builder.body(html)?;

        let mailer = SmtpTransport::builder_dangerous(self.config.smtp_host.as_str())
            .port(self.config.smtp_port)
            .build();
        mailer.send(&message)?;

        info!(
            recipients = self.config.to.len(),
            records = records.len(),
            "Sent review digest email"
        );

        Ok(())
    }
}

fn render_digest(
    records: &[ReviewRecord],
    show_last_comment: bool,
) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("digest", EMAIL_TEMPLATE)?;
    let template = env.get_template("digest")?;
    template.render(context! {
        records => records,
        total => records.len(),
        show_last_comment => show_last_comment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Comment, ServiceKind};
    use chrono::TimeZone;
    use chrono::Utc;

    fn record() -> ReviewRecord {
        ReviewRecord {
            service: ServiceKind::Github,
            user: "alice".to_string(),
            title: "Fix parser".to_string(),
            url: "https://github.com/org/repo/pull/1".to_string(),
            repo_name: Some("org/repo".to_string()),
            user_name: Some("org".to_string()),
            time: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            updated_time: None,
            comment_count: 1,
            last_comment: Some(Comment {
                author: "bob".to_string(),
                created_at: Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap(),
            }),
            is_wip: false,
            is_automated: false,
        }
    }

    #[test]
    fn test_digest_renders_every_record() {
        let records = vec![record(), {
            let mut r = record();
            r.title = "Second change".to_string();
            r
        }];

        let html = render_digest(&records, false).unwrap();

        assert!(html.contains("2 open review requests"));
        assert!(html.contains("Fix parser"));
        assert!(html.contains("Second change"));
        assert!(html.contains("https://github.com/org/repo/pull/1"));
        assert!(!html.contains("last comment by"));
    }

    #[test]
    fn test_digest_last_comment_when_requested() {
        let html = render_digest(&[record()], true).unwrap();
        assert!(html.contains("1 open review request"));
        assert!(html.contains("last comment by @bob"));
    }
}
