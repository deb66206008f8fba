use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Parser exited with code {code:?}: {stderr}")]
    ToolFailed { code: Option<i32>, stderr: String },

    #[error("Parser timed out after {secs}s")]
    ToolTimeout { secs: u64 },

    #[error("Parser produced no JSON output")]
    MissingOutput,

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid log: {0}")]
    InvalidLog(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
