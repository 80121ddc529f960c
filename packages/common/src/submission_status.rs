#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a submission or job through its evaluation lifecycle.
///
/// `Accepted` is the only non-terminal state. When the `sea-orm` feature is
/// enabled this enum can be used directly as an entity column.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Stored and waiting for (or undergoing) evaluation.
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "accepted"))]
    Accepted,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "passed"))]
    Passed,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "failed"))]
    Failed,
    /// The platform could not complete the evaluation.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "errored"))]
    Errored,
    /// Submitted after the task deadline.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "deadline_exceeded"))]
    DeadlineExceeded,
    /// The evaluation ran out of wall-clock time.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "inconclusive"))]
    Inconclusive,
}

impl SubmissionStatus {
    /// Returns true once no further transition is allowed.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Accepted)
    }

    pub const ALL: &'static [SubmissionStatus] = &[
        Self::Accepted,
        Self::Passed,
        Self::Failed,
        Self::Errored,
        Self::DeadlineExceeded,
        Self::Inconclusive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Inconclusive => "inconclusive",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            SubmissionStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for SubmissionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                invalid: s.to_string(),
            })
    }
}
