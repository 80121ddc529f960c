use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use common::audit::{AuditEvent, AuditScope, OutOfBudgetEvent};
use sea_orm::EntityTrait;
use tracing::{info, instrument};
use uuid::Uuid;

use super::task_targets;
use crate::entity::task;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::{AuthUser, Permission};
use crate::extractors::json::AppJson;
use crate::models::competition::OutOfBudgetRequest;
use crate::models::shared::StatusResponse;
use crate::state::AppState;
use crate::tasking::TASK_ROUTE;

#[utoipa::path(
    post,
    path = "/competition/out-of-budget/",
    tag = "Competition",
    operation_id = "outOfBudget",
    summary = "Record that a competitor ran out of budget",
    request_body = OutOfBudgetRequest,
    responses(
        (status = 200, description = "Recorded", body = StatusResponse),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(competitor_id = %payload.competitor_id))]
pub async fn out_of_budget(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<OutOfBudgetRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    auth_user.require(&[Permission::CompetitionManagement])?;

    let mut scope = AuditScope::default().round(state.config.competition.current_round_id.clone());
    if let Ok(team_id) = Uuid::parse_str(&payload.competitor_id) {
        scope = scope.team(team_id);
    }
    state.audit.emit(
        &scope,
        AuditEvent::OutOfBudget(OutOfBudgetEvent {
            competitor_id: payload.competitor_id,
        }),
    );

    Ok(Json(StatusResponse {
        status: "recorded".into(),
    }))
}

#[utoipa::path(
    delete,
    path = "/competition/cancel-task/",
    tag = "Competition",
    operation_id = "cancelAllTasks",
    summary = "Cancel every task",
    description = "Schedules a delivery job sending `DELETE /v1/task/` to every tasked team.",
    responses(
        (status = 202, description = "Cancellation scheduled"),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn cancel_all(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    auth_user.require(&[Permission::CompetitionManagement])?;

    let competition = &state.config.competition;
    state
        .dispatcher
        .cancel(
            TASK_ROUTE,
            &competition.current_round_id,
            None,
            Utc::now(),
            &competition.tasked_targets(),
        )
        .await?;
    info!("cancellation of all tasks scheduled");

    Ok(StatusCode::ACCEPTED)
}

#[utoipa::path(
    delete,
    path = "/competition/cancel-task/{task_id}/",
    tag = "Competition",
    operation_id = "cancelTask",
    summary = "Cancel one task",
    description = "Schedules a delivery job sending `DELETE /v1/task/{task_id}/` to every team the task was delivered to.",
    params(("task_id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 202, description = "Cancellation scheduled"),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Task not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user), fields(%task_id))]
pub async fn cancel_task(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    auth_user.require(&[Permission::CompetitionManagement])?;

    let task = task::Entity::find_by_id(task_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Task not found".into()))?;

    let route = format!("{TASK_ROUTE}{}/", task.id);
    state
        .dispatcher
        .cancel(
            &route,
            &task.round_id,
            Some(task.id),
            task.deadline.max(Utc::now()),
            &task_targets(&state, &task),
        )
        .await?;
    info!("task cancellation scheduled");

    Ok(StatusCode::ACCEPTED)
}
