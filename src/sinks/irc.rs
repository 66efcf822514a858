use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::IrcConfig;
use crate::errors::SinkError;
use crate::models::{OutputStyle, ReviewRecord};

/// Hard cap on individually-delivered records per channel; anything past
/// this becomes one summary notice.
pub const IRC_MAX_RECORDS: usize = 20;

/// IRC sink: joins each configured channel and delivers the capped batch
/// as PRIVMSG lines.
pub struct IrcSink {
    config: IrcConfig,
}

/// The capped message list: the first [`IRC_MAX_RECORDS`] records verbatim,
/// then a single notice pointing at the non-truncated report when more
/// exist.
pub fn batch_lines(records: &[ReviewRecord], show_last_comment: bool) -> Vec<String> {
    let total = records.len();
    let mut lines: Vec<String> = records
        .iter()
        .take(IRC_MAX_RECORDS)
        .enumerate()
        .map(|(index, record)| record.format(OutputStyle::Irc, index, total, show_last_comment))
        .collect();

    if total > IRC_MAX_RECORDS {
        lines.push(format!(
            "... showing {} of {} review requests; see the file or email report for the full list",
            IRC_MAX_RECORDS, total
        ));
    }

    lines
}

impl IrcSink {
    pub fn new(config: &IrcConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub async fn send(
        &self,
        records: &[ReviewRecord],
        show_last_comment: bool,
    ) -> Result<(), SinkError> {
        let stream =
            TcpStream::connect((self.config.server.as_str(), self.config.port)).await?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half).lines();

        let nick = &self.config.nick;
        writer.write_all(format!("NICK {}\r\n", nick).as_bytes()).await?;
        writer
            .write_all(format!("USER {} 0 * :review radar\r\n", nick).as_bytes())
            .await?;

        // Wait for registration to complete (001), answering PINGs on the
        // way; servers reject JOIN before that.
        while let Some(line) = reader.next_line().await? {
            if let Some(token) = line.strip_prefix("PING") {
                writer.write_all(format!("PONG{}\r\n", token).as_bytes()).await?;
                continue;
            }
            if line.split_whitespace().nth(1) == Some("001") {
                debug!("IRC registration complete");
                break;
            }
        }

        let lines = batch_lines(records, show_last_comment);
        for channel in &self.config.channels {
            writer.write_all(format!("JOIN {}\r\n", channel).as_bytes()).await?;
            for line in &lines {
                writer
                    .write_all(format!("PRIVMSG {} :{}\r\n", channel, line).as_bytes())
                    .await?;
            }
            info!(channel = %channel, lines = lines.len(), "Delivered review batch");
        }

        writer.write_all(b"QUIT :review-radar done\r\n").await?;
        writer.shutdown().await?;

        Ok(())
    }
}
