//! Build, patch and run a challenge target.

mod error;
pub mod patch;
mod recorder;
mod retry;
pub mod runner;
mod script;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use common::eval::ResultContext;
use common::language::Language;

pub use error::EvalError;
pub use recorder::Recorder;
pub use retry::RetryingEngine;
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use script::{EngineSettings, ScriptEngine};

/// Inputs shared by every engine operation.
#[derive(Debug, Clone)]
pub struct Params {
    pub result_context: ResultContext,
    /// Directory containing the extracted repository (`<repo_dir>/<focus>`).
    pub repo_dir: PathBuf,
    pub fuzz_tooling_dir: PathBuf,
    pub sanitizer: Option<String>,
    pub architecture: String,
    pub engine: Option<String>,
    pub harness: Option<String>,
    pub project_name: String,
    pub focus: String,
    pub allowed_languages: Vec<Language>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            result_context: ResultContext::HeadRepoTest,
            repo_dir: PathBuf::new(),
            fuzz_tooling_dir: PathBuf::new(),
            sanitizer: None,
            architecture: "x86_64".into(),
            engine: None,
            harness: None,
            project_name: String::new(),
            focus: String::new(),
            allowed_languages: Vec::new(),
        }
    }
}

impl Params {
    pub fn with_repo(mut self, repo_dir: impl Into<PathBuf>, context: ResultContext) -> Self {
        self.repo_dir = repo_dir.into();
        self.result_context = context;
        self
    }

    pub fn with_fuzz_tooling_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fuzz_tooling_dir = dir.into();
        self
    }

    /// The checked-out target itself.
    pub fn focus_dir(&self) -> PathBuf {
        self.repo_dir.join(&self.focus)
    }

    pub fn project_dir(&self) -> PathBuf {
        self.fuzz_tooling_dir.join("projects").join(&self.project_name)
    }
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Validate the submission's target coordinates against the challenge.
    async fn check(&self, params: &Params) -> Result<(), EvalError>;

    async fn build(&self, params: &Params) -> Result<(), EvalError>;

    /// Run the trigger against the built harness. `crash_expected` selects
    /// whether a sanitizer crash counts as success.
    async fn run_pov(
        &self,
        params: &Params,
        trigger: &Path,
        crash_expected: bool,
    ) -> Result<(), EvalError>;

    async fn apply_patch(&self, params: &Params, patch: &Path) -> Result<(), EvalError>;

    async fn run_tests(&self, params: &Params, success_expected: bool) -> Result<(), EvalError>;
}

#[async_trait]
impl<T: Engine + ?Sized> Engine for Arc<T> {
    async fn check(&self, params: &Params) -> Result<(), EvalError> {
        (**self).check(params).await
    }

    async fn build(&self, params: &Params) -> Result<(), EvalError> {
        (**self).build(params).await
    }

    async fn run_pov(
        &self,
        params: &Params,
        trigger: &Path,
        crash_expected: bool,
    ) -> Result<(), EvalError> {
        (**self).run_pov(params, trigger, crash_expected).await
    }

    async fn apply_patch(&self, params: &Params, patch: &Path) -> Result<(), EvalError> {
        (**self).apply_patch(params, patch).await
    }

    async fn run_tests(&self, params: &Params, success_expected: bool) -> Result<(), EvalError> {
        (**self).run_tests(params, success_expected).await
    }
}
