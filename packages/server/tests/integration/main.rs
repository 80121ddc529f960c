mod common;

mod auth;
mod bundle;
mod competition;
mod eval_result;
mod job;
mod submission;
mod tasking;
mod webhook;
