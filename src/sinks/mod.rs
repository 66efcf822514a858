pub mod email;
pub mod irc;

pub use email::EmailSink;
pub use irc::{IrcSink, IRC_MAX_RECORDS};

use std::fs;
use std::path::Path;

use tracing::info;

use crate::errors::SinkError;
use crate::models::{OutputStyle, ReviewRecord};

/// Renders an ordered batch in the given style, including the style's
/// framing: `json` wraps the comma-separated records in `[` and `]`, the
/// text styles have no framing.
pub fn render_batch(
    records: &[ReviewRecord],
    style: OutputStyle,
    show_last_comment: bool,
) -> String {
    let total = records.len();
    let rendered: Vec<String> = records
        .iter()
        .enumerate()
        .map(|(index, record)| record.format(style, index, total, show_last_comment))
        .collect();

    match style {
        OutputStyle::Json => format!("[\n{}\n]", rendered.join(",\n")),
        OutputStyle::Indented => rendered.join("\n\n"),
        OutputStyle::Oneline | OutputStyle::Irc => rendered.join("\n"),
    }
}

/// Writes a rendered batch to a file.
pub fn write_file(path: &Path, content: &str) -> Result<(), SinkError> {
    fs::write(path, content).map_err(|source| SinkError::File {
        path: path.display().to_string(),
        source,
    })?;
    info!(path = %path.display(), bytes = content.len(), "Wrote report file");
    Ok(())
}
