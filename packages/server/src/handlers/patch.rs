use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use common::SubmissionStatus;
use common::audit::{ArchivedFileKind, AuditEvent, PatchSubmissionEvent};
use common::eval::{EntityType, EvalEntity};
use sea_orm::*;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::{EVAL_URL_TTL, archive, find_task, initial_status, presign, scope, task_source_urls};
use crate::dispatch::EvalJob;
use crate::entity::patch_submission;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::{AuthUser, Permission};
use crate::extractors::json::AppJson;
use crate::models::shared::{MAX_PATCH_BYTES, decode_base64_field};
use crate::models::submission::{PatchRequest, PatchResponse};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/v1/task/{task_id}/patch/",
    tag = "Submissions",
    operation_id = "submitPatch",
    summary = "Submit a patch",
    description = "Stores the diff and starts an evaluation that applies it, rebuilds and runs the functionality tests. Only C and Java sources may be touched. Requires the `crs` permission.",
    params(("task_id" = Uuid, Path, description = "Task ID")),
    request_body = PatchRequest,
    responses(
        (status = 200, description = "Submission stored", body = PatchResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Task not found (NOT_FOUND)", body = ErrorBody),
        (status = 429, description = "Rate limited (RATE_LIMITED)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(team_id = %auth_user.id))]
pub async fn submit_patch(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    AppJson(payload): AppJson<PatchRequest>,
) -> Result<Json<PatchResponse>, AppError> {
    auth_user.require(&[Permission::Crs])?;
    state.rate_limiter.check("patch", &auth_user.id.to_string()).await?;

    let task = find_task(&state, task_id, &auth_user).await?;
    if !task.harnesses_included {
        return Err(AppError::Validation(
            "this task has no harnesses; submit a freeform instead".into(),
        ));
    }
    let diff = decode_base64_field("patch", &payload.patch, MAX_PATCH_BYTES)?;
    let status = initial_status(&task);
    let scope = scope(&task, &auth_user);

    let id = Uuid::now_v7();
    let hash = archive(&state, &scope, ArchivedFileKind::Patch, id, diff).await?;

    let now = Utc::now();
    let row = patch_submission::ActiveModel {
        id: Set(id),
        task_id: Set(task.id),
        submitter_id: Set(auth_user.id),
        status: Set(status),
        patch_hash: Set(hash.to_hex()),
        functionality_tests_passing: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    state.audit.emit(
        &scope,
        AuditEvent::PatchSubmission(PatchSubmissionEvent {
            submission_id: row.id,
            status,
            patch_sha256: hash.to_hex(),
        }),
    );

    if status == SubmissionStatus::Accepted {
        let started = async {
            let (head, fuzz, base) = task_source_urls(&state, &task).await?;
            let (memory_gb, cpus) = task.resources().map_err(|e| {
                AppError::Internal(format!("task {} has invalid resources: {e}", task.id))
            })?;
            let patch_url = presign(&state, &row.patch_hash, EVAL_URL_TTL).await?;
            state
                .dispatcher
                .eval(EvalJob {
                    entity: EvalEntity {
                        entity_type: EntityType::Patch,
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
                    pov: None,
                    patch_url: Some(patch_url),
                    skip_patch_tests: false,
                })
                .await?;
            Ok::<_, AppError>(())
        };
        if let Err(e) = started.await {
            error!(patch_id = %row.id, error = ?e, "failed to start evaluation");
            let mut failed: patch_submission::ActiveModel = row.into();
            failed.status = Set(SubmissionStatus::Errored);
            failed.updated_at = Set(Utc::now());
            failed.update(&state.db).await?;
            return Err(e);
        }
    }

    info!(patch_id = %row.id, %status, "patch submitted");
    Ok(Json(row.into()))
}

#[utoipa::path(
    get,
    path = "/v1/task/{task_id}/patch/{patch_id}/",
    tag = "Submissions",
    operation_id = "getPatch",
    summary = "Get patch status",
    description = "Returns the status of a patch owned by the caller, including whether the functionality tests passed once known. Requires the `crs` permission.",
    params(
        ("task_id" = Uuid, Path, description = "Task ID"),
        ("patch_id" = Uuid, Path, description = "Patch ID"),
    ),
    responses(
        (status = 200, description = "Patch status", body = PatchResponse),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user), fields(team_id = %auth_user.id))]
pub async fn get_patch(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((task_id, patch_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PatchResponse>, AppError> {
    auth_user.require(&[Permission::Crs])?;
    let task = find_task(&state, task_id, &auth_user).await?;

    let patch = patch_submission::Entity::find_by_id(patch_id)
        .filter(patch_submission::Column::TaskId.eq(task.id))
        .filter(patch_submission::Column::SubmitterId.eq(auth_user.id))
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Patch not found".into()))?;

    Ok(Json(patch.into()))
}
