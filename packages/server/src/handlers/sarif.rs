use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use common::audit::{
    ArchivedFileKind, AuditEvent, AuditScope, SarifAssessmentEvent, SarifBroadcastEvent,
    SarifSubmissionEvent,
};
use common::task::{SarifBroadcastDetail, SarifBroadcastMessage, TaskMetadata};
use sea_orm::sea_query::OnConflict;
use sea_orm::*;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{archive, find_task, initial_status, scope, task_targets};
use crate::entity::{sarif_assessment, sarif_broadcast, sarif_submission, task};
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::{AuthUser, Permission};
use crate::extractors::json::AppJson;
use crate::models::competition::{SarifBroadcastRequest, SarifBroadcastResponse};
use crate::models::shared::StatusResponse;
use crate::models::submission::{AssessmentRequest, SarifRequest, SarifResponse, validate_sarif};
use crate::state::AppState;

/// Route competitors receive broadcast SARIF reports on.
pub const SARIF_ROUTE: &str = "/v1/sarif/";

#[utoipa::path(
    post,
    path = "/v1/task/{task_id}/submitted-sarif/",
    tag = "Submissions",
    operation_id = "submitSarif",
    summary = "Submit a SARIF report",
    description = "Stores a SARIF 2.1.0 log describing a vulnerability found by the caller. Structural problems are reported per field. Requires the `crs` permission.",
    params(("task_id" = Uuid, Path, description = "Task ID")),
    request_body = SarifRequest,
    responses(
        (status = 200, description = "Submission stored", body = SarifResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Task not found (NOT_FOUND)", body = ErrorBody),
        (status = 429, description = "Rate limited (RATE_LIMITED)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(team_id = %auth_user.id))]
pub async fn submit_sarif(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    AppJson(payload): AppJson<SarifRequest>,
) -> Result<Json<SarifResponse>, AppError> {
    auth_user.require(&[Permission::Crs])?;
    state.rate_limiter.check("sarif", &auth_user.id.to_string()).await?;

    let task = find_task(&state, task_id, &auth_user).await?;
    validate_sarif(&payload.sarif)?;
    let status = initial_status(&task);
    let scope = scope(&task, &auth_user);

    let id = Uuid::now_v7();
    let raw = serde_json::to_vec(&payload.sarif)
        .map_err(|e| AppError::Internal(format!("encode sarif: {e}")))?;
    archive(&state, &scope, ArchivedFileKind::Sarif, id, raw).await?;

    let now = Utc::now();
    let row = sarif_submission::ActiveModel {
        id: Set(id),
        task_id: Set(task.id),
        submitter_id: Set(auth_user.id),
        status: Set(status),
        sarif: Set(payload.sarif),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    state.audit.emit(
        &scope,
        AuditEvent::SarifSubmission(SarifSubmissionEvent {
            submission_id: row.id,
            status,
        }),
    );
    info!(sarif_id = %row.id, %status, "sarif submitted");

    Ok(Json(SarifResponse {
        submitted_sarif_id: row.id,
        status,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/task/{task_id}/broadcast-sarif-assessment/{sarif_id}/",
    tag = "Submissions",
    operation_id = "assessBroadcastSarif",
    summary = "Assess a broadcast SARIF report",
    description = "Records whether the caller considers a broadcast SARIF report correct. The broadcast must belong to the path task. Requires the `crs` permission.",
    params(
        ("task_id" = Uuid, Path, description = "Task ID"),
        ("sarif_id" = Uuid, Path, description = "Broadcast SARIF ID"),
    ),
    request_body = AssessmentRequest,
    responses(
        (status = 200, description = "Assessment stored", body = StatusResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Task or broadcast not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(team_id = %auth_user.id, assessment = payload.assessment.as_str()))]
pub async fn submit_assessment(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((task_id, sarif_id)): Path<(Uuid, Uuid)>,
    AppJson(payload): AppJson<AssessmentRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    auth_user.require(&[Permission::Crs])?;
    state.rate_limiter.check("sarif", &auth_user.id.to_string()).await?;

    let task = find_task(&state, task_id, &auth_user).await?;
    let broadcast = sarif_broadcast::Entity::find_by_id(sarif_id)
        .filter(sarif_broadcast::Column::TaskId.eq(task.id))
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Broadcast SARIF not found".into()))?;

    let status = initial_status(&task);
    let now = Utc::now();
    let row = sarif_assessment::ActiveModel {
        id: Set(Uuid::now_v7()),
        task_id: Set(task.id),
        submitter_id: Set(auth_user.id),
        status: Set(status),
        sarif_broadcast_id: Set(broadcast.id),
        assessment: Set(payload.assessment),
        description: Set(payload.description),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    state.audit.emit(
        &scope(&task, &auth_user),
        AuditEvent::SarifAssessment(SarifAssessmentEvent {
            submission_id: row.id,
            sarif_broadcast_id: broadcast.id,
            assessment: row.assessment.as_str().to_string(),
            status,
        }),
    );

    Ok(Json(StatusResponse {
        status: status.to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/competition/sarif-broadcast/{task_id}/",
    tag = "Competition",
    operation_id = "broadcastSarif",
    summary = "Broadcast a SARIF report",
    description = "Stores the task's broadcast SARIF report and delivers it to every team working on the task. A task has at most one broadcast; repeating the call returns the stored one without delivering again. Requires the `competition_management` permission.",
    params(("task_id" = Uuid, Path, description = "Task ID")),
    request_body = SarifBroadcastRequest,
    responses(
        (status = 200, description = "Broadcast stored", body = SarifBroadcastResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Task not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(task_id = %task_id))]
pub async fn create_broadcast(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    AppJson(payload): AppJson<SarifBroadcastRequest>,
) -> Result<Json<SarifBroadcastResponse>, AppError> {
    auth_user.require(&[Permission::CompetitionManagement])?;
    validate_sarif(&payload.sarif)?;

    let task = task::Entity::find_by_id(task_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Task not found".into()))?;

    let now = Utc::now();
    let inserted = sarif_broadcast::Entity::insert(sarif_broadcast::ActiveModel {
        id: Set(Uuid::now_v7()),
        task_id: Set(task.id),
        sarif: Set(payload.sarif),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::column(sarif_broadcast::Column::TaskId)
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(&state.db)
    .await;
    let fresh = match inserted {
        Ok(n) => n > 0,
        Err(DbErr::RecordNotInserted) => false,
        Err(e) => return Err(e.into()),
    };

    let broadcast = sarif_broadcast::Entity::find()
        .filter(sarif_broadcast::Column::TaskId.eq(task.id))
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::Internal("broadcast vanished after insert".into()))?;

    if fresh {
        let scope = AuditScope::task(task.id).round(task.round_id.clone());
        state.audit.emit(
            &scope,
            AuditEvent::NewSarifBroadcast(SarifBroadcastEvent {
                broadcast_id: broadcast.id,
            }),
        );

        let message = SarifBroadcastMessage::new(vec![SarifBroadcastDetail {
            task_id: task.id,
            sarif_id: broadcast.id,
            sarif: broadcast.sarif.clone(),
            metadata: TaskMetadata {
                task_id: task.id,
                round_id: task.round_id.clone(),
            },
        }]);
        state
            .dispatcher
            .broadcast(
                SARIF_ROUTE,
                &task.round_id,
                Some(task.id),
                &message,
                task.deadline,
                &task_targets(&state, &task),
            )
            .await?;
        info!(sarif_id = %broadcast.id, "sarif broadcast scheduled");
    }

    Ok(Json(SarifBroadcastResponse {
        sarif_id: broadcast.id,
        task_id: task.id,
    }))
}
