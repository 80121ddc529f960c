use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use common::audit::{AuditLogger, AuditScope};
use common::eval::{EntityType, EvalEntity, EvalMessage, Final};
use common::language::Language;
use common::storage::build_content_store;
use mq::{BroccoliResultQueue, MqConfig, MqError, ResultQueue, init_mq};
use tracing::{info, instrument};

use crate::cli::EvalArgs;
use crate::config::WorkerAppConfig;
use crate::engine::{EngineSettings, Params, ProcessRunner, Recorder, ScriptEngine};
use crate::error::{Result, WorkerError};
use crate::evaluator::{EvalRequest, Evaluator};
use crate::fetch::HttpFetcher;

/// Prints every message as a JSON line before forwarding it.
struct ExportingQueue {
    inner: Arc<dyn ResultQueue>,
}

#[async_trait]
impl ResultQueue for ExportingQueue {
    async fn publish(&self, message: &EvalMessage) -> std::result::Result<(), MqError> {
        let line = serde_json::to_string(message)?;
        {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{line}").map_err(|e| MqError::Internal(e.to_string()))?;
        }
        self.inner.publish(message).await
    }
}

fn entity(args: &EvalArgs) -> Result<EvalEntity> {
    let (entity_type, entity_id) = match (args.pov_id, args.patch_id, args.job_id) {
        (Some(id), None, None) => (EntityType::Pov, id),
        (None, Some(id), None) => (EntityType::Patch, id),
        (None, None, Some(id)) => (EntityType::Job, id),
        _ => {
            return Err(WorkerError::InvalidArgument(
                "exactly one of --pov-id, --patch-id, --job-id is required".into(),
            ));
        }
    };
    Ok(EvalEntity {
        entity_type,
        entity_id,
    })
}

pub(crate) fn request(args: &EvalArgs) -> Result<EvalRequest> {
    let allowed_languages = args
        .allowed_languages
        .iter()
        .map(|l| {
            Language::from_str(l)
                .map_err(|_| WorkerError::InvalidArgument(format!("unknown language '{l}'")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(EvalRequest {
        fuzz_tooling_url: args.oss_fuzz_url.clone(),
        head_repo_url: args.head_repo_url.clone(),
        base_repo_url: args.base_repo_url.clone(),
        trigger_url: args.trigger_url.clone(),
        patch_url: args.patch_url.clone(),
        skip_patch_tests: args.skip_patch_tests,
        params: Params {
            sanitizer: args.sanitizer.clone(),
            architecture: args.architecture.clone(),
            engine: args.engine.clone(),
            harness: args.harness_name.clone(),
            project_name: args.project_name.clone(),
            focus: args.focus.clone(),
            allowed_languages,
            ..Params::default()
        },
    })
}

#[instrument(
    skip_all,
    fields(
        pov_id = ?args.pov_id,
        patch_id = ?args.patch_id,
        job_id = ?args.job_id,
        task_id = ?args.task_id,
        team_id = ?args.team_id,
        traceparent = args.traceparent.as_deref().unwrap_or_default(),
    )
)]
pub async fn handle_eval(
    args: &EvalArgs,
    config: &WorkerAppConfig,
    audit: Arc<AuditLogger>,
) -> Result<Final> {
    let entity = entity(args)?;
    let request = request(args)?;

    let store = build_content_store(&config.storage).await?;
    let mq = Arc::new(init_mq(MqConfig::from(&config.mq)).await?);
    let mut queue: Arc<dyn ResultQueue> =
        Arc::new(BroccoliResultQueue::new(mq, config.mq.result_queue_name.clone()));
    if args.export_results {
        queue = Arc::new(ExportingQueue { inner: queue });
    }

    let mut scope = AuditScope {
        round_id: args.round_id.clone(),
        team_id: args.team_id,
        task_id: args.task_id,
    };
    if scope.round_id.is_none() {
        scope.round_id = Some(config.audit.round_id.clone());
    }
    let recorder = Recorder::new(store, queue.clone(), audit, scope, entity);
    let engine = ScriptEngine::new(
        ProcessRunner::default(),
        recorder,
        EngineSettings::from(&config.engine),
    );
    let fetcher = HttpFetcher::new()?;

    info!(entity_type = ?entity.entity_type, "starting evaluation");
    let evaluator = Evaluator::new(Arc::new(engine), Arc::new(fetcher), queue, entity)
        .with_timeout(config.engine.eval_timeout())
        .with_work_dir(&config.engine.work_dir);
    Ok(evaluator.run(&request).await?)
}
