use std::path::PathBuf;

use thiserror::Error;

/// Failures observed while a job talks to the database or reads its inputs.
///
/// Only `ConnectFailed`, `MetadataQueryFailed` and `FileReadFailed` stop work;
/// statement and query failures are recorded and the caller moves on.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("connection to mysql {target} failed: {source}")]
    ConnectFailed {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("execute SQL [{sql}] failed: {source}")]
    StatementFailed {
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("query [{sql}] failed: {source}")]
    QueryFailed {
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("read {} failed: {source}", .path.display())]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("get partitions for {target} failed: {source}")]
    MetadataQueryFailed {
        target: String,
        #[source]
        source: Box<ExecError>,
    },
}

impl ExecError {
    /// Short tag used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecError::ConnectFailed { .. } => "connect_failed",
            ExecError::StatementFailed { .. } => "statement_failed",
            ExecError::QueryFailed { .. } => "query_failed",
            ExecError::FileReadFailed { .. } => "file_read_failed",
            ExecError::MetadataQueryFailed { .. } => "metadata_query_failed",
        }
    }
}

/// Misconfiguration detected before scheduling starts. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("please input sql through `--queries` or `--files`")]
    MissingSqlSource,

    #[error("`--queries` and `--files` are mutually exclusive")]
    ConflictingSqlSources,

    #[error("--ptinterval must be one of month/year/day, got `{0}`")]
    UnknownGranularity(String),

    #[error("invalid cron expression `{expr}`: {source}")]
    InvalidCron {
        expr: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("invalid table identifier `{0}`, expected `table` or `database.table`")]
    InvalidTable(String),

    #[error("invalid webhook url `{url}`: {reason}")]
    InvalidWebhook { url: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ExecError>;
