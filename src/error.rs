//! Top-level error types for the archiver.

use std::sync::Arc;
use std::time::Duration;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Database connection and migration errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to connect to SQLite: {0}")]
    SqliteConnect(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Archive store errors.
///
/// A `Storage` failure from a write means the whole batch was rolled back;
/// the caller may retry from the previous cursor.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("channel {channel_id} is not registered")]
    NotFound { channel_id: String },

    #[error("message {message_id} belongs to channel {found}, not {expected}")]
    ChannelMismatch {
        expected: String,
        found: String,
        message_id: String,
    },

    #[error("storage error while trying to {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Upstream fetch errors.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The credential's rate budget is spent. Always retried after a wait.
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    /// Transient transport or server failure, retried with bounded backoff.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream does not know channel {channel_id}")]
    ChannelNotFound { channel_id: String },

    /// Upstream refused the request for a non-transient reason.
    #[error("upstream rejected request: {reason}")]
    Rejected { reason: String },
}

/// Archiving run errors that abort a whole invocation.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("an archiving run is already in progress")]
    AlreadyRunning,
}
