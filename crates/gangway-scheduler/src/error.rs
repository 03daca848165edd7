//! Scheduler error types.

use std::path::PathBuf;

use gangway_cache::CacheError;
use gangway_framework::FrameworkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// The live cache no longer matches the snapshot the cycle ran on.
    /// Only the current cycle is lost.
    #[error("cache inconsistent with session snapshot: {0}")]
    CacheInconsistency(#[from] CacheError),

    #[error("scheduling cycle cancelled")]
    Cancelled,

    #[error(transparent)]
    Framework(#[from] FrameworkError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
