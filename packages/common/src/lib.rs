pub mod audit;
pub mod challenge;
pub mod config;
pub mod eval;
pub mod language;
pub mod retry;
pub mod storage;
pub mod submission_status;
pub mod task;
pub mod team;

pub use submission_status::SubmissionStatus;
