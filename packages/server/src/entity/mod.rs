pub mod auth;
pub mod bundle;
pub mod eval_artifact;
pub mod eval_command_result;
pub mod freeform_submission;
pub mod job;
pub mod patch_submission;
pub mod pov_submission;
pub mod sarif_assessment;
pub mod sarif_broadcast;
pub mod sarif_submission;
pub mod task;
