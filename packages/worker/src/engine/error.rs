use thiserror::Error;

/// Outcome of a failed engine step.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    /// The submission itself is at fault. Materialised as `failed`.
    #[error("{reason}")]
    Status {
        patch_tests_failed: bool,
        reason: String,
    },
    /// A hiccup outside the submission's control that may clear on retry.
    #[error("transient: {0}")]
    Transient(String),
    /// The platform could not complete the step. Materialised as `errored`.
    #[error("{0}")]
    Fatal(String),
}

impl EvalError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Status {
            patch_tests_failed: false,
            reason: reason.into(),
        }
    }

    pub fn tests_failed(reason: impl Into<String>) -> Self {
        Self::Status {
            patch_tests_failed: true,
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    pub fn is_status(&self) -> bool {
        matches!(self, Self::Status { .. })
    }

    /// Demote a submission-level failure to a platform error.
    pub fn into_fatal(self) -> Self {
        match self {
            Self::Status { reason, .. } => Self::Fatal(reason),
            other => other,
        }
    }
}

impl From<std::io::Error> for EvalError {
    fn from(e: std::io::Error) -> Self {
        Self::Fatal(format!("io: {e}"))
    }
}

impl From<common::storage::StorageError> for EvalError {
    fn from(e: common::storage::StorageError) -> Self {
        Self::Fatal(format!("storage: {e}"))
    }
}

impl From<mq::MqError> for EvalError {
    fn from(e: mq::MqError) -> Self {
        Self::Fatal(format!("queue: {e}"))
    }
}

impl From<common::challenge::DescriptorError> for EvalError {
    fn from(e: common::challenge::DescriptorError) -> Self {
        Self::Fatal(e.to_string())
    }
}
