pub mod competition;
pub mod job;
pub mod shared;
pub mod submission;
pub mod webhook;
