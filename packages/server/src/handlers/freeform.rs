use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use common::audit::{ArchivedFileKind, AuditEvent, FreeformSubmissionEvent};
use sea_orm::*;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{archive, find_task, initial_status, scope};
use crate::entity::freeform_submission;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::{AuthUser, Permission};
use crate::extractors::json::AppJson;
use crate::models::shared::{MAX_BLOB_BYTES, decode_base64_field};
use crate::models::submission::{FreeformRequest, FreeformResponse};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/v1/task/{task_id}/freeform/",
    tag = "Submissions",
    operation_id = "submitFreeform",
    summary = "Submit a freeform finding",
    description = "Stores an opaque payload for manual review. This is the only finding kind accepted on tasks without harnesses. Requires the `crs` permission.",
    params(("task_id" = Uuid, Path, description = "Task ID")),
    request_body = FreeformRequest,
    responses(
        (status = 200, description = "Submission stored", body = FreeformResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Task not found (NOT_FOUND)", body = ErrorBody),
        (status = 429, description = "Rate limited (RATE_LIMITED)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(team_id = %auth_user.id))]
pub async fn submit_freeform(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    AppJson(payload): AppJson<FreeformRequest>,
) -> Result<Json<FreeformResponse>, AppError> {
    auth_user.require(&[Permission::Crs])?;
    state.rate_limiter.check("freeform", &auth_user.id.to_string()).await?;

    let task = find_task(&state, task_id, &auth_user).await?;
    let bytes = decode_base64_field("submission", &payload.submission, MAX_BLOB_BYTES)?;
    let status = initial_status(&task);
    let scope = scope(&task, &auth_user);

    let id = Uuid::now_v7();
    let hash = archive(&state, &scope, ArchivedFileKind::Freeform, id, bytes.clone()).await?;

    let now = Utc::now();
    let row = freeform_submission::ActiveModel {
        id: Set(id),
        task_id: Set(task.id),
        submitter_id: Set(auth_user.id),
        status: Set(status),
        payload: Set(bytes),
        payload_hash: Set(hash.to_hex()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    state.audit.emit(
        &scope,
        AuditEvent::FreeformSubmission(FreeformSubmissionEvent {
            submission_id: row.id,
            status,
            payload_sha256: row.payload_hash.clone(),
        }),
    );
    info!(freeform_id = %row.id, %status, "freeform submitted");

    Ok(Json(FreeformResponse {
        freeform_id: row.id,
        status,
    }))
}
