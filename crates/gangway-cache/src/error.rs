//! Cache, bind and volume error types.

use gangway_api::ApiError;
use thiserror::Error;

/// Errors raised by the long-lived scheduler cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// A snapshot refers to something the live cache no longer has.
    #[error("cache inconsistency: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Errors from writes against the external API (binds and status updates).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BindError {
    /// Optimistic-concurrency failure; safe to retry.
    #[error("conflict updating {0}")]
    Conflict(String),

    #[error("api call rejected: {0}")]
    Rejected(String),

    #[error("volume binding failed: {0}")]
    Volume(#[from] VolumeError),

    /// The bind worker panicked or was cancelled before reporting.
    #[error("bind worker failed: {0}")]
    WorkerFailed(String),

    #[error("gave up on {what} after {attempts} attempts: {last}")]
    RetriesExhausted {
        what: String,
        attempts: u32,
        last: Box<BindError>,
    },
}

impl BindError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Errors from the volume binder.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VolumeError {
    #[error("claim {0} not found")]
    ClaimNotFound(String),

    #[error("no volume or provisioner can satisfy claim {claim} on node {node}")]
    Unsatisfiable { claim: String, node: String },

    #[error("volume {volume} already reserved for claim {claim}")]
    AlreadyReserved { volume: String, claim: String },

    #[error("provisioning failed for claim {claim}: {message}")]
    Provisioning { claim: String, message: String },
}
