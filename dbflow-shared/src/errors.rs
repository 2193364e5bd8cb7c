//! Error taxonomy for dbflow.
//!
//! Every fallible operation in the workspace returns [`DbflowResult`]. The
//! variants split into the task-pipeline taxonomy (`NotFound`, `Conflict`,
//! `ResourceExhausted`, `TransientIo`, `Unsupported`) and ambient failures
//! (database, driver, configuration, ...).

use thiserror::Error;

/// Result alias used throughout dbflow.
pub type DbflowResult<T> = Result<T, DbflowError>;

#[derive(Debug, Error)]
pub enum DbflowError {
    /// Lookup yielded zero rows.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness assumption was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A capacity precheck failed before any write was attempted.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Network or upload failure. Terminal for the current run only.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// Unknown storage backend or task type.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of a [`DbflowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    Conflict,
    ResourceExhausted,
    TransientIo,
    Unsupported,
    Cancelled,
    Timeout,
    Invalid,
    Internal,
}

impl DbflowError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DbflowError::NotFound(_) => ErrorCode::NotFound,
            DbflowError::Conflict(_) => ErrorCode::Conflict,
            DbflowError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            DbflowError::TransientIo(_) => ErrorCode::TransientIo,
            DbflowError::Unsupported(_) => ErrorCode::Unsupported,
            DbflowError::Cancelled(_) => ErrorCode::Cancelled,
            DbflowError::Timeout(_) => ErrorCode::Timeout,
            DbflowError::InvalidState(_)
            | DbflowError::InvalidArgument(_)
            | DbflowError::Config(_) => ErrorCode::Invalid,
            DbflowError::Database(_)
            | DbflowError::Storage(_)
            | DbflowError::Driver(_)
            | DbflowError::Internal(_)
            | DbflowError::Io(_)
            | DbflowError::Json(_) => ErrorCode::Internal,
        }
    }

    /// Whether a new, manually issued run may reasonably succeed.
    ///
    /// Nothing in dbflow retries automatically; this only informs operators.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code(), ErrorCode::TransientIo | ErrorCode::Timeout)
    }

    /// Prefix the message with `context`, keeping the variant.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            DbflowError::NotFound(m) => DbflowError::NotFound(format!("{context}: {m}")),
            DbflowError::Conflict(m) => DbflowError::Conflict(format!("{context}: {m}")),
            DbflowError::ResourceExhausted(m) => {
                DbflowError::ResourceExhausted(format!("{context}: {m}"))
            }
            DbflowError::TransientIo(m) => DbflowError::TransientIo(format!("{context}: {m}")),
            DbflowError::Unsupported(m) => DbflowError::Unsupported(format!("{context}: {m}")),
            DbflowError::Database(m) => DbflowError::Database(format!("{context}: {m}")),
            DbflowError::Storage(m) => DbflowError::Storage(format!("{context}: {m}")),
            DbflowError::Driver(m) => DbflowError::Driver(format!("{context}: {m}")),
            DbflowError::InvalidState(m) => DbflowError::InvalidState(format!("{context}: {m}")),
            DbflowError::InvalidArgument(m) => {
                DbflowError::InvalidArgument(format!("{context}: {m}"))
            }
            DbflowError::Config(m) => DbflowError::Config(format!("{context}: {m}")),
            DbflowError::Cancelled(m) => DbflowError::Cancelled(format!("{context}: {m}")),
            DbflowError::Timeout(m) => DbflowError::Timeout(format!("{context}: {m}")),
            DbflowError::Internal(m) => DbflowError::Internal(format!("{context}: {m}")),
            DbflowError::Io(e) => DbflowError::Storage(format!("{context}: {e}")),
            DbflowError::Json(e) => DbflowError::InvalidArgument(format!("{context}: {e}")),
        }
    }
}

/// Attach operation context to an error result.
pub trait ResultExt<T> {
    fn context<C: std::fmt::Display>(self, context: C) -> DbflowResult<T>;

    fn with_context<C: std::fmt::Display, F: FnOnce() -> C>(self, f: F) -> DbflowResult<T>;
}

impl<T, E: Into<DbflowError>> ResultExt<T> for Result<T, E> {
    fn context<C: std::fmt::Display>(self, context: C) -> DbflowResult<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<C: std::fmt::Display, F: FnOnce() -> C>(self, f: F) -> DbflowResult<T> {
        self.map_err(|e| e.into().context(f()))
    }
}
