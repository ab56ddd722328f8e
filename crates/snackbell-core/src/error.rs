//! SnackBell error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnackBellError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid schedule: {0}")]
    Schedule(String),

    #[error("Unknown timezone: {0}")]
    Timezone(String),

    /// The subscriber store could not answer "who hasn't selected yet".
    /// Aborts a reminder run before anything is dispatched.
    #[error("Eligibility query failed: {0}")]
    EligibilityQuery(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Push transport error: {0}")]
    Transport(String),

    /// A trigger arrived while another reminder run was still active.
    #[error("Reminder run already in progress")]
    ConcurrentRunRejected,

    #[error("Reminder scheduler is shutting down")]
    Cancelled,

    /// The task carrying a reminder run panicked or was aborted by the runtime.
    #[error("Reminder run aborted: {0}")]
    RunAborted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SnackBellError>;
