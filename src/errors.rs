use thiserror::Error;

/// Fatal configuration problems. These abort the run before any fetch
/// or output happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("target #{index} is missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("service `{service}` requires `{field}` in its target configuration")]
    MissingServiceField {
        service: &'static str,
        field: &'static str,
    },

    #[error("unsupported service type: {0}")]
    UnsupportedService(String),

    #[error("unsupported sort key: {0} (expected one of: submitted, updated, commented)")]
    UnsupportedSortKey(String),

    #[error("invalid age spec `{0}` (expected terms like `2w`, `3d`, `12h`, `30m`)")]
    InvalidAge(String),

    #[error("token references environment variable {0}, which is not set")]
    MissingEnvToken(String),

    #[error("failed to read config file {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Unparsable {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Delivery failures from output sinks. Surfaced to the operator as a
/// logged error and a non-zero exit, after rendering has already happened.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write output file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build email message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("failed to render email template: {0}")]
    Template(#[from] minijinja::Error),

    #[error("IRC delivery failed: {0}")]
    Irc(#[from] std::io::Error),
}
