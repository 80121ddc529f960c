use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use common::audit::{AuditEvent, BundleDeleteEvent, BundleEvent};
use sea_orm::*;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{find_task, initial_status, scope};
use crate::entity::{bundle, task};
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::{AuthUser, Permission};
use crate::extractors::json::AppJson;
use crate::models::submission::{
    BundlePatchRequest, BundleRefs, BundleRequest, BundleResponse, BundleVerbose,
};
use crate::state::AppState;

/// One round trip verifying every id a bundle references. Submissions must
/// belong to the bundle's task and submitter; a broadcast SARIF only to the
/// task. Unset references pass.
const REFS_CHECK_SQL: &str = r#"
SELECT
    ($1::uuid IS NULL OR EXISTS (
        SELECT 1 FROM pov_submission WHERE id = $1 AND task_id = $6 AND submitter_id = $7
    )) AS pov_ok,
    ($2::uuid IS NULL OR EXISTS (
        SELECT 1 FROM patch_submission WHERE id = $2 AND task_id = $6 AND submitter_id = $7
    )) AS patch_ok,
    ($3::uuid IS NULL OR EXISTS (
        SELECT 1 FROM sarif_broadcast WHERE id = $3 AND task_id = $6
    )) AS broadcast_sarif_ok,
    ($4::uuid IS NULL OR EXISTS (
        SELECT 1 FROM sarif_submission WHERE id = $4 AND task_id = $6 AND submitter_id = $7
    )) AS submitted_sarif_ok,
    ($5::uuid IS NULL OR EXISTS (
        SELECT 1 FROM freeform_submission WHERE id = $5 AND task_id = $6 AND submitter_id = $7
    )) AS freeform_ok
"#;

async fn check_refs<C: ConnectionTrait>(
    db: &C,
    refs: &BundleRefs,
    task_id: Uuid,
    submitter_id: Uuid,
) -> Result<(), AppError> {
    let stmt = Statement::from_sql_and_values(
        DbBackend::Postgres,
        REFS_CHECK_SQL,
        [
            refs.pov_id.into(),
            refs.patch_id.into(),
            refs.broadcast_sarif_id.into(),
            refs.submitted_sarif_id.into(),
            refs.freeform_id.into(),
            task_id.into(),
            submitter_id.into(),
        ],
    );
    let row = db
        .query_one_raw(stmt)
        .await?
        .ok_or_else(|| AppError::Internal("reference check returned no row".into()))?;

    for (column, field) in [
        ("pov_ok", "pov_id"),
        ("patch_ok", "patch_id"),
        ("broadcast_sarif_ok", "broadcast_sarif_id"),
        ("submitted_sarif_ok", "submitted_sarif_id"),
        ("freeform_ok", "freeform_id"),
    ] {
        let ok: bool = row.try_get("", column)?;
        if !ok {
            return Err(AppError::NotFound(format!("{field} not found")));
        }
    }
    Ok(())
}

async fn find_bundle(
    state: &AppState,
    task: &task::Model,
    bundle_id: Uuid,
    auth_user: &AuthUser,
) -> Result<bundle::Model, AppError> {
    bundle::Entity::find_by_id(bundle_id)
        .filter(bundle::Column::TaskId.eq(task.id))
        .filter(bundle::Column::SubmitterId.eq(auth_user.id))
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Bundle not found".into()))
}

fn ensure_open(task: &task::Model) -> Result<(), AppError> {
    if task.is_past_deadline(Utc::now()) {
        return Err(AppError::Validation(
            "the task deadline has passed; bundles can no longer change".into(),
        ));
    }
    Ok(())
}

fn bundle_event(row: &bundle::Model) -> AuditEvent {
    AuditEvent::BundleSubmission(BundleEvent {
        bundle_id: row.id,
        status: row.status,
        pov_id: row.pov_id,
        patch_id: row.patch_id,
        broadcast_sarif_id: row.broadcast_sarif_id,
        submitted_sarif_id: row.submitted_sarif_id,
        freeform_id: row.freeform_id,
        description: row.description.clone(),
    })
}

#[utoipa::path(
    post,
    path = "/v1/task/{task_id}/bundle/",
    tag = "Bundles",
    operation_id = "submitBundle",
    summary = "Submit a bundle",
    description = "Groups at least two of the caller's earlier findings on this task. Every referenced submission must belong to the caller and the task; a referenced broadcast SARIF must belong to the task. Requires the `crs` permission.",
    params(("task_id" = Uuid, Path, description = "Task ID")),
    request_body = BundleRequest,
    responses(
        (status = 200, description = "Bundle stored", body = BundleResponse),
        (status = 400, description = "Fewer than two fields set (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Task or referenced submission not found (NOT_FOUND)", body = ErrorBody),
        (status = 429, description = "Rate limited (RATE_LIMITED)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(team_id = %auth_user.id))]
pub async fn submit_bundle(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    AppJson(payload): AppJson<BundleRequest>,
) -> Result<Json<BundleResponse>, AppError> {
    auth_user.require(&[Permission::Crs])?;
    state.rate_limiter.check("bundle", &auth_user.id.to_string()).await?;

    let task = find_task(&state, task_id, &auth_user).await?;
    let refs = BundleRefs::from(payload);
    refs.validate()?;
    let status = initial_status(&task);

    let txn = state.db.begin().await?;
    check_refs(&txn, &refs, task.id, auth_user.id).await?;

    let now = Utc::now();
    let row = bundle::ActiveModel {
        id: Set(Uuid::now_v7()),
        task_id: Set(task.id),
        submitter_id: Set(auth_user.id),
        status: Set(status),
        pov_id: Set(refs.pov_id),
        patch_id: Set(refs.patch_id),
        broadcast_sarif_id: Set(refs.broadcast_sarif_id),
        submitted_sarif_id: Set(refs.submitted_sarif_id),
        freeform_id: Set(refs.freeform_id),
        description: Set(refs.description),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    state.audit.emit(&scope(&task, &auth_user), bundle_event(&row));
    info!(bundle_id = %row.id, %status, "bundle submitted");

    Ok(Json(BundleResponse {
        bundle_id: row.id,
        status,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/task/{task_id}/bundle/{bundle_id}/",
    tag = "Bundles",
    operation_id = "getBundle",
    summary = "Get a bundle",
    params(
        ("task_id" = Uuid, Path, description = "Task ID"),
        ("bundle_id" = Uuid, Path, description = "Bundle ID"),
    ),
    responses(
        (status = 200, description = "Bundle with every reference", body = BundleVerbose),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user), fields(team_id = %auth_user.id))]
pub async fn get_bundle(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((task_id, bundle_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<BundleVerbose>, AppError> {
    auth_user.require(&[Permission::Crs])?;
    let task = find_task(&state, task_id, &auth_user).await?;
    let row = find_bundle(&state, &task, bundle_id, &auth_user).await?;
    Ok(Json(row.into()))
}

#[utoipa::path(
    patch,
    path = "/v1/task/{task_id}/bundle/{bundle_id}/",
    tag = "Bundles",
    operation_id = "updateBundle",
    summary = "Update a bundle",
    description = "Absent fields keep their value and `null` clears one. The result must still set at least two fields and pass the same ownership checks as a new bundle. Not allowed after the task deadline.",
    params(
        ("task_id" = Uuid, Path, description = "Task ID"),
        ("bundle_id" = Uuid, Path, description = "Bundle ID"),
    ),
    request_body = BundlePatchRequest,
    responses(
        (status = 200, description = "Updated bundle", body = BundleVerbose),
        (status = 400, description = "Validation error or deadline passed (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Bundle or referenced submission not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(team_id = %auth_user.id, %bundle_id))]
pub async fn update_bundle(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((task_id, bundle_id)): Path<(Uuid, Uuid)>,
    AppJson(payload): AppJson<BundlePatchRequest>,
) -> Result<Json<BundleVerbose>, AppError> {
    auth_user.require(&[Permission::Crs])?;
    state.rate_limiter.check("bundle", &auth_user.id.to_string()).await?;

    let task = find_task(&state, task_id, &auth_user).await?;
    let existing = find_bundle(&state, &task, bundle_id, &auth_user).await?;
    ensure_open(&task)?;

    let mut refs = BundleRefs::from(&existing);
    refs.apply(payload);
    refs.validate()?;

    let txn = state.db.begin().await?;
    check_refs(&txn, &refs, task.id, auth_user.id).await?;

    let mut active: bundle::ActiveModel = existing.into();
    active.pov_id = Set(refs.pov_id);
    active.patch_id = Set(refs.patch_id);
    active.broadcast_sarif_id = Set(refs.broadcast_sarif_id);
    active.submitted_sarif_id = Set(refs.submitted_sarif_id);
    active.freeform_id = Set(refs.freeform_id);
    active.description = Set(refs.description);
    active.updated_at = Set(Utc::now());
    let row = active.update(&txn).await?;
    txn.commit().await?;

    state.audit.emit(&scope(&task, &auth_user), bundle_event(&row));
    info!("bundle updated");

    Ok(Json(row.into()))
}

#[utoipa::path(
    delete,
    path = "/v1/task/{task_id}/bundle/{bundle_id}/",
    tag = "Bundles",
    operation_id = "deleteBundle",
    summary = "Delete a bundle",
    description = "The referenced submissions are kept. Not allowed after the task deadline.",
    params(
        ("task_id" = Uuid, Path, description = "Task ID"),
        ("bundle_id" = Uuid, Path, description = "Bundle ID"),
    ),
    responses(
        (status = 204, description = "Bundle deleted"),
        (status = 400, description = "Deadline passed (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user), fields(team_id = %auth_user.id, %bundle_id))]
pub async fn delete_bundle(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((task_id, bundle_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    auth_user.require(&[Permission::Crs])?;

    let task = find_task(&state, task_id, &auth_user).await?;
    let existing = find_bundle(&state, &task, bundle_id, &auth_user).await?;
    ensure_open(&task)?;

    bundle::Entity::delete_by_id(existing.id)
        .exec(&state.db)
        .await?;

    state.audit.emit(
        &scope(&task, &auth_user),
        AuditEvent::BundleDelete(BundleDeleteEvent {
            bundle_id: existing.id,
        }),
    );
    info!("bundle deleted");

    Ok(StatusCode::NO_CONTENT)
}
