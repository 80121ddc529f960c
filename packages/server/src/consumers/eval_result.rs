use std::sync::Arc;

use chrono::Utc;
use common::audit::{ArchivedFileKind, AuditEvent, AuditLogger, AuditScope, SubmissionResultEvent};
use common::eval::{Artifact, CommandResult, EntityType, EvalMessage, EvalPayload, Final};
use mq::{BroccoliError, BrokerMessage, Mq};
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QuerySelect, Set,
    TransactionTrait,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entity::{eval_artifact, eval_command_result, job, patch_submission, pov_submission, task};

/// Consume evaluation results from the result queue.
pub async fn consume_eval_results(
    db: DatabaseConnection,
    audit: Arc<AuditLogger>,
    mq: Arc<Mq>,
    queue_name: String,
) {
    info!(queue = %queue_name, "Starting eval result consumer");

    let result = mq
        .process_messages(
            &queue_name,
            None, // single-threaded so a final never races its own artifacts
            None,
            move |message: BrokerMessage<EvalMessage>| {
                let db = db.clone();
                let audit = audit.clone();
                async move {
                    let msg = message.payload;
                    let entity_id = msg.entity_id;
                    let kind = msg.payload.kind();

                    if let Err(e) = process_eval_message(&db, &audit, msg).await {
                        error!(%entity_id, kind, error = %e, "Failed to process eval message");
                        return Err(BroccoliError::Job(e.to_string()));
                    }
                    Ok(())
                }
            },
        )
        .await;

    if let Err(e) = result {
        error!(error = %e, "Eval result consumer stopped unexpectedly");
    }
}

fn kind_name(kind: ArchivedFileKind) -> anyhow::Result<String> {
    match serde_json::to_value(kind)? {
        serde_json::Value::String(s) => Ok(s),
        other => anyhow::bail!("unexpected file kind encoding {other}"),
    }
}

/// Apply one queue message. Artifacts and command results are appended in
/// any order, even after the final. Only the first final changes a row.
pub async fn process_eval_message(
    db: &DatabaseConnection,
    audit: &AuditLogger,
    msg: EvalMessage,
) -> anyhow::Result<()> {
    match msg.payload {
        EvalPayload::Artifact(artifact) => {
            store_artifact(db, msg.entity_type, msg.entity_id, artifact).await
        }
        EvalPayload::CommandResult(result) => {
            store_command_result(db, msg.entity_type, msg.entity_id, result).await
        }
        EvalPayload::Final(fin) => apply_final(db, audit, msg.entity_type, msg.entity_id, fin).await,
    }
}

async fn store_artifact(
    db: &DatabaseConnection,
    entity_type: EntityType,
    entity_id: Uuid,
    artifact: Artifact,
) -> anyhow::Result<()> {
    eval_artifact::ActiveModel {
        id: Set(Uuid::now_v7()),
        entity_type: Set(entity_type),
        entity_id: Set(entity_id),
        result_context: Set(artifact.result_context),
        filename: Set(artifact.filename),
        object_name: Set(artifact.blob.object_name),
        archived_file_kind: Set(kind_name(artifact.archived_file_kind)?),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}

async fn store_command_result(
    db: &DatabaseConnection,
    entity_type: EntityType,
    entity_id: Uuid,
    result: CommandResult,
) -> anyhow::Result<()> {
    eval_command_result::ActiveModel {
        id: Set(Uuid::now_v7()),
        entity_type: Set(entity_type),
        entity_id: Set(entity_id),
        result_context: Set(result.result_context),
        argv: Set(serde_json::to_value(&result.argv)?),
        stdout_object: Set(result.stdout_blob.object_name),
        stderr_object: Set(result.stderr_blob.object_name),
        exit_code: Set(result.exit_code),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Functionality test outcome to record, `None` when tests did not run.
fn tests_passing(fin: &Final, skipped: bool) -> Option<bool> {
    if skipped {
        return None;
    }
    fin.patch_tests_failed.map(|failed| !failed)
}

async fn round_scope(
    txn: &DatabaseTransaction,
    task_id: Uuid,
    team_id: Uuid,
) -> anyhow::Result<AuditScope> {
    let mut scope = AuditScope::task(task_id).team(team_id);
    if let Some(task) = task::Entity::find_by_id(task_id).one(txn).await? {
        scope = scope.round(task.round_id);
    }
    Ok(scope)
}

async fn apply_final(
    db: &DatabaseConnection,
    audit: &AuditLogger,
    entity_type: EntityType,
    entity_id: Uuid,
    fin: Final,
) -> anyhow::Result<()> {
    if !fin.status.is_final() {
        anyhow::bail!("final message carries non-terminal status {}", fin.status);
    }
    let txn = db.begin().await?;
    let now = Utc::now();

    let outcome = match entity_type {
        EntityType::Pov => {
            let Some(row) = pov_submission::Entity::find_by_id(entity_id)
                .lock(LockType::Update)
                .one(&txn)
                .await?
            else {
                warn!(%entity_id, "final for unknown pov, dropping");
                txn.commit().await?;
                return Ok(());
            };
            if row.status.is_final() {
                None
            } else {
                let scope = round_scope(&txn, row.task_id, row.submitter_id).await?;
                let mut update: pov_submission::ActiveModel = row.into();
                update.status = Set(fin.status);
                update.updated_at = Set(now);
                update.update(&txn).await?;
                Some(Some((
                    scope,
                    AuditEvent::PovSubmissionResult(SubmissionResultEvent {
                        submission_id: entity_id,
                        status: fin.status,
                        functionality_tests_passing: None,
                    }),
                )))
            }
        }
        EntityType::Patch => {
            let Some(row) = patch_submission::Entity::find_by_id(entity_id)
                .lock(LockType::Update)
                .one(&txn)
                .await?
            else {
                warn!(%entity_id, "final for unknown patch, dropping");
                txn.commit().await?;
                return Ok(());
            };
            if row.status.is_final() {
                None
            } else {
                let passing = tests_passing(&fin, false);
                let scope = round_scope(&txn, row.task_id, row.submitter_id).await?;
                let mut update: patch_submission::ActiveModel = row.into();
                update.status = Set(fin.status);
                update.functionality_tests_passing = Set(passing);
                update.updated_at = Set(now);
                update.update(&txn).await?;
                Some(Some((
                    scope,
                    AuditEvent::PatchSubmissionResult(SubmissionResultEvent {
                        submission_id: entity_id,
                        status: fin.status,
                        functionality_tests_passing: passing,
                    }),
                )))
            }
        }
        EntityType::Job => {
            let Some(row) = job::Entity::find_by_id(entity_id)
                .lock(LockType::Update)
                .one(&txn)
                .await?
            else {
                warn!(%entity_id, "final for unknown job, dropping");
                txn.commit().await?;
                return Ok(());
            };
            if row.status.is_final() {
                None
            } else {
                let passing = tests_passing(&fin, row.skip_patch_tests);
                let mut update: job::ActiveModel = row.into();
                update.status = Set(fin.status);
                update.functionality_tests_passing = Set(passing);
                update.updated_at = Set(now);
                update.update(&txn).await?;
                Some(None)
            }
        }
    };
    txn.commit().await?;

    // None: a final was already recorded. Some(None): applied, nothing to audit.
    match outcome {
        None => info!(%entity_id, "Duplicate final ignored"),
        Some(event) => {
            if let Some((scope, event)) = event {
                audit.emit(&scope, event);
            }
            info!(%entity_id, status = %fin.status, "Recorded evaluation result");
        }
    }
    Ok(())
}
