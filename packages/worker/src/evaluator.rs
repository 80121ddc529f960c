//! Drives the engine through one POV or patch evaluation and reports exactly
//! one `final` message for it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::eval::{EvalEntity, EvalPayload, Final, ResultContext};
use common::retry::ConstantBackoff;
use common::SubmissionStatus;
use mq::{MqError, ResultQueue};
use tracing::{Instrument, error, info, info_span, warn};

use crate::engine::{Engine, EvalError, Params, RetryingEngine};
use crate::fetch::{Fetcher, fetch_tree, single_root};

/// Everything an evaluation needs to know besides the engine itself.
#[derive(Debug, Clone)]
pub struct EvalRequest {
    pub fuzz_tooling_url: String,
    pub head_repo_url: String,
    pub base_repo_url: Option<String>,
    pub trigger_url: Option<String>,
    pub patch_url: Option<String>,
    pub skip_patch_tests: bool,
    /// Target coordinates; repository paths are filled in per context.
    pub params: Params,
}

pub struct Evaluator {
    engine: Arc<dyn Engine>,
    head_builder: RetryingEngine<Arc<dyn Engine>>,
    fetcher: Arc<dyn Fetcher>,
    queue: Arc<dyn ResultQueue>,
    entity: EvalEntity,
    timeout: Duration,
    work_dir: PathBuf,
}

impl Evaluator {
    pub fn new(
        engine: Arc<dyn Engine>,
        fetcher: Arc<dyn Fetcher>,
        queue: Arc<dyn ResultQueue>,
        entity: EvalEntity,
    ) -> Self {
        Self {
            head_builder: RetryingEngine::new(engine.clone()),
            engine,
            fetcher,
            queue,
            entity,
            timeout: Duration::from_secs(8 * 3600),
            work_dir: std::env::temp_dir(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_build_retry(mut self, policy: ConstantBackoff) -> Self {
        self.head_builder = RetryingEngine::with_policy(self.engine.clone(), policy);
        self
    }

    /// Run the evaluation and publish its `final` message. Only a failure to
    /// publish is returned as an error.
    pub async fn run(&self, request: &EvalRequest) -> Result<Final, MqError> {
        let is_patch = request.patch_url.is_some();
        let outcome = match tempfile::Builder::new()
            .prefix("gauntlet-eval-")
            .tempdir_in(&self.work_dir)
        {
            Ok(scratch) => {
                let span = info_span!("evaluate", entity_id = %self.entity.entity_id);
                let body = self.body(request, scratch.path()).instrument(span);
                tokio::time::timeout(self.timeout, body).await
            }
            Err(e) => Ok(Err(EvalError::fatal(format!("failed to create scratch dir: {e}")))),
        };

        let result = match outcome {
            Err(_) => {
                warn!(timeout = ?self.timeout, "evaluation timed out");
                Final {
                    status: SubmissionStatus::Inconclusive,
                    patch_tests_failed: None,
                }
            }
            Ok(Ok(())) => {
                info!("evaluation passed");
                Final {
                    status: SubmissionStatus::Passed,
                    patch_tests_failed: is_patch.then_some(false),
                }
            }
            Ok(Err(EvalError::Status {
                patch_tests_failed,
                reason,
            })) => {
                info!(reason = %reason, patch_tests_failed, "evaluation failed");
                Final {
                    status: SubmissionStatus::Failed,
                    patch_tests_failed: is_patch.then_some(patch_tests_failed),
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "evaluation errored");
                Final {
                    status: SubmissionStatus::Errored,
                    patch_tests_failed: None,
                }
            }
        };

        self.queue
            .publish(&self.entity.message(EvalPayload::Final(result)))
            .await?;
        Ok(result)
    }

    async fn body(&self, request: &EvalRequest, scratch: &Path) -> Result<(), EvalError> {
        let fetcher = self.fetcher.as_ref();
        let fuzz_tree = fetch_tree(fetcher, &request.fuzz_tooling_url, scratch, "fuzz-tooling").await?;
        let fuzz_dir = single_root(&fuzz_tree).await?;
        let head_dir = fetch_tree(fetcher, &request.head_repo_url, scratch, "head").await?;
        let head = request
            .params
            .clone()
            .with_repo(head_dir, ResultContext::HeadRepoTest)
            .with_fuzz_tooling_dir(&fuzz_dir);

        self.engine.check(&head).await?;

        let trigger = match &request.trigger_url {
            Some(url) => {
                let path = scratch.join("trigger");
                fetcher.fetch(url, &path).await?;
                Some(path)
            }
            None => None,
        };

        match &request.patch_url {
            None => {
                if let Some(base_url) = &request.base_repo_url {
                    let base_dir = fetch_tree(fetcher, base_url, scratch, "base").await?;
                    let base = request
                        .params
                        .clone()
                        .with_repo(base_dir, ResultContext::BaseRepoTest)
                        .with_fuzz_tooling_dir(&fuzz_dir);
                    self.engine.build(&base).await.map_err(EvalError::into_fatal)?;
                    if let Some(trigger) = &trigger {
                        self.engine.run_pov(&base, trigger, false).await?;
                    }
                }
                self.head_builder
                    .build(&head)
                    .await
                    .map_err(EvalError::into_fatal)?;
                if let Some(trigger) = &trigger {
                    self.engine.run_pov(&head, trigger, true).await?;
                }
            }
            Some(patch_url) => {
                let patch = scratch.join("patch.diff");
                fetcher.fetch(patch_url, &patch).await?;
                self.engine.apply_patch(&head, &patch).await?;
                self.head_builder.build(&head).await?;
                if let Some(trigger) = &trigger {
                    self.engine.run_pov(&head, trigger, false).await?;
                }
                if !request.skip_patch_tests {
                    self.engine.run_tests(&head, true).await?;
                }
            }
        }
        Ok(())
    }
}
