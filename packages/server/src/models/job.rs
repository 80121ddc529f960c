use common::SubmissionStatus;
use common::eval::ResultContext;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::entity::{eval_artifact, eval_command_result, job};

/// Testcase half of a job: run this input against a harness.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct JobPov {
    /// Base64 testcase.
    pub testcase: String,
    #[schema(example = "x86_64")]
    pub architecture: String,
    #[schema(example = "address")]
    pub sanitizer: String,
    #[schema(example = "png_read_fuzzer")]
    pub harness: String,
    #[schema(example = "libfuzzer")]
    pub engine: String,
}

/// An evaluation over sources already in the content store.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct JobArgs {
    /// Mixed into the cache key; jobs with different keys never share results.
    #[serde(default)]
    pub cache_key: Option<String>,
    /// Always create a new job, even if an identical one exists.
    #[serde(default)]
    pub fresh: bool,
    pub head_repo_hash: String,
    pub fuzz_tooling_hash: String,
    #[serde(default)]
    pub base_repo_hash: Option<String>,
    pub focus: String,
    pub project_name: String,
    #[serde(default)]
    pub memory_gb: Option<u32>,
    #[serde(default)]
    pub cpus: Option<u32>,
    #[serde(default)]
    pub skip_patch_tests: bool,
    #[serde(default)]
    pub pov: Option<JobPov>,
    /// Base64 unified diff.
    #[serde(default)]
    pub patch: Option<String>,
}

impl JobArgs {
    /// Key identifying equivalent jobs. Blob inputs enter the key by their
    /// content hash.
    pub fn cache_key(
        &self,
        global: &str,
        testcase_hash: Option<&str>,
        patch_hash: Option<&str>,
    ) -> String {
        let mut h = Sha256::new();
        h.update(global.as_bytes());
        h.update(self.cache_key.as_deref().unwrap_or_default().as_bytes());
        h.update(self.head_repo_hash.as_bytes());
        h.update(self.fuzz_tooling_hash.as_bytes());
        if let Some(base) = &self.base_repo_hash {
            h.update(base.as_bytes());
        }
        h.update(self.focus.as_bytes());
        h.update(self.project_name.as_bytes());
        h.update(if self.skip_patch_tests { b"true" as &[u8] } else { b"false" });
        if let (Some(pov), Some(testcase_hash)) = (&self.pov, testcase_hash) {
            h.update(b"testcase");
            h.update(testcase_hash.as_bytes());
            h.update(pov.architecture.as_bytes());
            h.update(pov.sanitizer.as_bytes());
            h.update(pov.harness.as_bytes());
            h.update(pov.engine.as_bytes());
        }
        if let Some(patch_hash) = patch_hash {
            h.update(b"patch");
            h.update(patch_hash.as_bytes());
        }
        hex::encode(h.finalize())
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BulkJobRequest {
    pub jobs: Vec<JobArgs>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobArtifact {
    pub result_context: ResultContext,
    pub filename: String,
    pub object_name: String,
    pub archived_file_kind: String,
}

impl From<eval_artifact::Model> for JobArtifact {
    fn from(m: eval_artifact::Model) -> Self {
        Self {
            result_context: m.result_context,
            filename: m.filename,
            object_name: m.object_name,
            archived_file_kind: m.archived_file_kind,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobCommandResult {
    pub result_context: ResultContext,
    #[schema(value_type = Vec<String>)]
    pub argv: serde_json::Value,
    pub stdout_object: String,
    pub stderr_object: String,
    pub exit_code: i32,
}

impl From<eval_command_result::Model> for JobCommandResult {
    fn from(m: eval_command_result::Model) -> Self {
        Self {
            result_context: m.result_context,
            argv: m.argv,
            stdout_object: m.stdout_object,
            stderr_object: m.stderr_object,
            exit_code: m.exit_code,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub status: SubmissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functionality_tests_passing: Option<bool>,
    pub artifacts: Vec<JobArtifact>,
    pub results: Vec<JobCommandResult>,
}

impl JobResponse {
    pub fn new(
        job: job::Model,
        artifacts: Vec<eval_artifact::Model>,
        results: Vec<eval_command_result::Model>,
    ) -> Self {
        Self {
            id: job.id,
            status: job.status,
            functionality_tests_passing: job.functionality_tests_passing,
            artifacts: artifacts.into_iter().map(Into::into).collect(),
            results: results.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BulkJobResponse {
    pub jobs: Vec<JobResponse>,
}
