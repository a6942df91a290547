use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the stores, repositories and intents.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(u64),

    #[error("task has no id")]
    MissingId,

    #[error("no task ids left to assign")]
    IdExhausted,

    #[error("id {0} belongs to a task in the recycle bin")]
    IdInRecycleBin(u64),

    #[error("priority must be 1 (low), 2 (medium) or 3 (high), got {0}")]
    InvalidPriority(i64),

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed parsing {} line {line}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed encoding record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed encoding settings: {0}")]
    SettingsEncode(#[from] toml::ser::Error),

    #[error("background storage task failed: {0}")]
    Background(#[from] tokio::task::JoinError),

    #[error("intent was dropped before it completed")]
    Cancelled,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
