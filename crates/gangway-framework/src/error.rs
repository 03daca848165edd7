//! Framework error types.

use gangway_api::ApiError;
use gangway_cache::VolumeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("plugin {plugin} listed more than once")]
    DuplicatePlugin { plugin: String },

    #[error("job not found in session: {0}")]
    JobNotFound(String),

    #[error("task {task} not found in job {job}")]
    TaskNotFound { job: String, task: String },

    #[error("node not found in session: {0}")]
    NodeNotFound(String),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type FrameworkResult<T> = Result<T, FrameworkError>;
