pub mod config;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod sinks;
pub mod sources;

pub use config::{Arguments, Config, EmailConfig, IrcConfig, Target};
pub use errors::{ConfigError, SinkError};
pub use models::{relative_age, Comment, OutputStyle, ReviewRecord, ServiceKind};
pub use pipeline::{
    classify_automated, filter_age, remove_wip, sort_records, Age, SortKey, DEFAULT_BOTS,
};
pub use sinks::{render_batch, write_file, EmailSink, IrcSink, IRC_MAX_RECORDS};
pub use sources::{get_service, FetchRequest, ReviewSource, SourceSettings};
