use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the moderation core. All of them are recoverable:
/// callers log them and keep running.
#[derive(Debug, Error)]
pub enum AutoModError {
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("{action} failed in {channel}: {reason}")]
    ActionFailure {
        action: String,
        channel: String,
        reason: String,
    },

    #[error("persistence error on {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Usage(String),

    #[error("unknown setting '{0}'")]
    UnknownSetting(String),
}

impl AutoModError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AutoModError::Persistence {
            path: path.into(),
            source,
        }
    }
}

pub type AutoModResult<T> = Result<T, AutoModError>;
