use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// All of these are fatal at startup. Nothing in this crate raises a
/// configuration error while events are being processed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid regex {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(
        "field extractor {pattern:?} must have either one named capture group \
         or two unnamed capture groups (found {groups} group(s))"
    )]
    RuleShape { pattern: String, groups: usize },

    #[error("event delimiter {0:?} matches the empty string")]
    EmptyDelimiter(String),

    #[error("invalid time layout {layout:?}: {reason}")]
    TimeLayout { layout: String, reason: String },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
