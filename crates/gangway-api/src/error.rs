//! Error types for the scheduling API model.

use thiserror::Error;

/// Result type alias for API model operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors raised while building or mutating scheduling info.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    #[error("invalid quantity: {0:?}")]
    InvalidQuantity(String),

    #[error("task {task} not found in {owner}")]
    TaskNotFound { owner: String, task: String },

    #[error("task {task} already exists in {owner}")]
    DuplicateTask { owner: String, task: String },

    #[error("node {node} has insufficient resources for task {task}: requested <{requested}>, idle <{idle}>")]
    InsufficientResources {
        node: String,
        task: String,
        requested: String,
        idle: String,
    },
}
