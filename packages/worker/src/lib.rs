pub mod cli;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod fetch;
pub mod handlers;

pub use config::WorkerAppConfig;
pub use error::{Result, WorkerError};

use common::SubmissionStatus;

/// Process exit code for a terminal evaluation status.
pub fn exit_code_for(status: SubmissionStatus) -> u8 {
    match status {
        SubmissionStatus::Passed => 0,
        SubmissionStatus::Failed => 1,
        SubmissionStatus::Inconclusive => 2,
        _ => EXIT_ERROR,
    }
}

/// Exit code for errored evaluations and any other job failure.
pub const EXIT_ERROR: u8 = 201;
