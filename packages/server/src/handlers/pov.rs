use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use common::SubmissionStatus;
use common::audit::{ArchivedFileKind, AuditEvent, PovSubmissionEvent};
use common::eval::{EntityType, EvalEntity};
use sea_orm::*;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::{EVAL_URL_TTL, archive, find_task, initial_status, presign, scope, task_source_urls};
use crate::dispatch::{EvalJob, PovTarget};
use crate::entity::pov_submission;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::{AuthUser, Permission};
use crate::extractors::json::AppJson;
use crate::models::shared::{MAX_BLOB_BYTES, decode_base64_field};
use crate::models::submission::{PovRequest, PovResponse};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/v1/task/{task_id}/pov/",
    tag = "Submissions",
    operation_id = "submitPov",
    summary = "Submit a proof of vulnerability",
    description = "Stores the testcase and starts an evaluation: the base must not crash and the head must. Submissions after the task deadline are stored as `deadline_exceeded` and never evaluated. Requires the `crs` permission.",
    params(("task_id" = Uuid, Path, description = "Task ID")),
    request_body = PovRequest,
    responses(
        (status = 200, description = "Submission stored", body = PovResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Task not found (NOT_FOUND)", body = ErrorBody),
        (status = 429, description = "Rate limited (RATE_LIMITED)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(team_id = %auth_user.id, harness = %payload.harness))]
pub async fn submit_pov(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    AppJson(payload): AppJson<PovRequest>,
) -> Result<Json<PovResponse>, AppError> {
    auth_user.require(&[Permission::Crs])?;
    state.rate_limiter.check("pov", &auth_user.id.to_string()).await?;

    let task = find_task(&state, task_id, &auth_user).await?;
    if !task.harnesses_included {
        return Err(AppError::Validation(
            "this task has no harnesses; submit a freeform instead".into(),
        ));
    }
    let testcase = decode_base64_field("testcase", &payload.testcase, MAX_BLOB_BYTES)?;
    let status = initial_status(&task);
    let scope = scope(&task, &auth_user);

    let id = Uuid::now_v7();
    let hash = archive(&state, &scope, ArchivedFileKind::PovTestcase, id, testcase).await?;

    let now = Utc::now();
    let row = pov_submission::ActiveModel {
        id: Set(id),
        task_id: Set(task.id),
        submitter_id: Set(auth_user.id),
        status: Set(status),
        testcase_hash: Set(hash.to_hex()),
        harness: Set(payload.harness.clone()),
        sanitizer: Set(payload.sanitizer.clone()),
        engine: Set(payload.engine.clone()),
        architecture: Set(payload.architecture.clone()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    state.audit.emit(
        &scope,
        AuditEvent::PovSubmission(PovSubmissionEvent {
            submission_id: row.id,
            status,
            testcase_sha256: hash.to_hex(),
            harness: row.harness.clone(),
            sanitizer: row.sanitizer.clone(),
            engine: row.engine.clone(),
            architecture: row.architecture.clone(),
        }),
    );

    if status == SubmissionStatus::Accepted {
        let started = async {
            let (head, fuzz, base) = task_source_urls(&state, &task).await?;
            let (memory_gb, cpus) = task.resources().map_err(|e| {
                AppError::Internal(format!("task {} has invalid resources: {e}", task.id))
            })?;
            let trigger_url = presign(&state, &row.testcase_hash, EVAL_URL_TTL).await?;
            state
                .dispatcher
                .eval(EvalJob {
                    entity: EvalEntity {
                        entity_type: EntityType::Pov,
                        entity_id: row.id,
                    },
                    round_id: task.round_id.clone(),
                    task_id: Some(task.id),
                    team_id: Some(auth_user.id),
                    head_repo_url: head,
                    base_repo_url: base,
                    fuzz_tooling_url: fuzz,
                    focus: task.focus.clone(),
                    project_name: task.project_name.clone(),
                    memory_gb,
                    cpus,
                    pov: Some(PovTarget {
                        trigger_url,
                        harness: row.harness.clone(),
                        sanitizer: row.sanitizer.clone(),
                        engine: row.engine.clone(),
                        architecture: row.architecture.clone(),
                    }),
                    patch_url: None,
                    skip_patch_tests: false,
                })
                .await?;
            Ok::<_, AppError>(())
        };
        if let Err(e) = started.await {
            error!(pov_id = %row.id, error = ?e, "failed to start evaluation");
            let mut failed: pov_submission::ActiveModel = row.into();
            failed.status = Set(SubmissionStatus::Errored);
            failed.updated_at = Set(Utc::now());
            failed.update(&state.db).await?;
            return Err(e);
        }
    }

    info!(pov_id = %row.id, %status, "pov submitted");
    Ok(Json(row.into()))
}

#[utoipa::path(
    get,
    path = "/v1/task/{task_id}/pov/{pov_id}/",
    tag = "Submissions",
    operation_id = "getPov",
    summary = "Get POV status",
    description = "Returns the status of a POV owned by the caller. POVs of other teams or tasks are reported as not found. Requires the `crs` permission.",
    params(
        ("task_id" = Uuid, Path, description = "Task ID"),
        ("pov_id" = Uuid, Path, description = "POV ID"),
    ),
    responses(
        (status = 200, description = "POV status", body = PovResponse),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user), fields(team_id = %auth_user.id))]
pub async fn get_pov(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((task_id, pov_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PovResponse>, AppError> {
    auth_user.require(&[Permission::Crs])?;
    let task = find_task(&state, task_id, &auth_user).await?;

    let pov = pov_submission::Entity::find_by_id(pov_id)
        .filter(pov_submission::Column::TaskId.eq(task.id))
        .filter(pov_submission::Column::SubmitterId.eq(auth_user.id))
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("POV not found".into()))?;

    Ok(Json(pov.into()))
}
