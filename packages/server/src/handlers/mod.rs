pub mod bundle;
pub mod competition;
pub mod freeform;
pub mod job;
pub mod patch;
pub mod ping;
pub mod pov;
pub mod request;
pub mod sarif;
pub mod webhook;

use std::time::Duration;

use chrono::Utc;
use common::SubmissionStatus;
use common::audit::{ArchivedFileKind, AuditEvent, AuditScope, FileArchivedEvent};
use common::storage::{BlobSource, ContentHash, hashed};
use common::team::DeliveryTarget;
use sea_orm::EntityTrait;
use uuid::Uuid;

use crate::entity::task;
use crate::error::AppError;
use crate::extractors::auth::AuthUser;
use crate::state::AppState;

/// Read URLs handed to evaluation jobs outlive the longest evaluation.
pub(crate) const EVAL_URL_TTL: Duration = Duration::from_secs(9 * 3600);

/// Resolve a task the principal may submit against, or 404.
///
/// A task is visible when its round is still open and it was either
/// broadcast to everyone or requested by this principal.
pub(crate) async fn find_task(
    state: &AppState,
    task_id: Uuid,
    auth_user: &AuthUser,
) -> Result<task::Model, AppError> {
    let task = task::Entity::find_by_id(task_id)
        .one(&state.db)
        .await?
        .filter(|t| state.config.competition.is_valid_round(&t.round_id))
        .filter(|t| t.requested_by.is_none_or(|owner| owner == auth_user.id))
        .ok_or_else(|| AppError::NotFound("Task not found".into()))?;
    Ok(task)
}

/// Status a new submission starts in.
pub(crate) fn initial_status(task: &task::Model) -> SubmissionStatus {
    if task.is_past_deadline(Utc::now()) {
        SubmissionStatus::DeadlineExceeded
    } else {
        SubmissionStatus::Accepted
    }
}

pub(crate) fn scope(task: &task::Model, auth_user: &AuthUser) -> AuditScope {
    AuditScope::task(task.id)
        .team(auth_user.id)
        .round(task.round_id.clone())
}

/// Store a submitted blob under its digest and record the archival.
pub(crate) async fn archive(
    state: &AppState,
    scope: &AuditScope,
    kind: ArchivedFileKind,
    submission_id: Uuid,
    bytes: Vec<u8>,
) -> Result<ContentHash, AppError> {
    let hash = hashed(state.store.as_ref(), &BlobSource::bytes(bytes)).await?;
    state.audit.emit(
        scope,
        AuditEvent::FileArchived(FileArchivedEvent {
            kind,
            object_name: hash.to_hex(),
            store: state.store.store_identifier(),
            filename: None,
            submission_id: Some(submission_id),
        }),
    );
    Ok(hash)
}

/// Presigned read URL for an object key stored on a row.
pub(crate) async fn presign(
    state: &AppState,
    key: &str,
    ttl: Duration,
) -> Result<String, AppError> {
    let hash = ContentHash::from_hex(key)?;
    Ok(state.store.presigned_read(&hash, ttl).await?)
}

/// Presigned URLs of a task's unstripped sources: `(head, fuzz_tooling, base)`.
pub(crate) async fn task_source_urls(
    state: &AppState,
    task: &task::Model,
) -> Result<(String, String, Option<String>), AppError> {
    let head = presign(state, &task.head_hash, EVAL_URL_TTL).await?;
    let fuzz = presign(state, &task.fuzz_tooling_hash, EVAL_URL_TTL).await?;
    let base = match &task.base_hash {
        Some(base) => Some(presign(state, base, EVAL_URL_TTL).await?),
        None => None,
    };
    Ok((head, fuzz, base))
}

/// Teams a task was delivered to: its requester, or every tasked team.
pub(crate) fn task_targets(state: &AppState, task: &task::Model) -> Vec<DeliveryTarget> {
    let competition = &state.config.competition;
    match task.requested_by {
        Some(owner) => competition.team(owner).map(|t| t.target()).into_iter().collect(),
        None => competition.tasked_targets(),
    }
}
