use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncEngineError {
    #[error("no session bound in the current task-local context")]
    NoSession,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("task already running: {0}")]
    TaskAlreadyRunning(String),

    #[error("include and exclude sets overlap on: {0:?}")]
    IncludeExcludeOverlap(Vec<String>),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SyncEngineError>;
