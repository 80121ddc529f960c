use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use tracing::{info, instrument};

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::{AuthUser, Permission};
use crate::models::competition::{ChallengeListResponse, ChallengeRequest, ScheduledResponse};
use crate::state::AppState;
use crate::tasking::ScanRequest;

const DEFAULT_DURATION_SECS: u64 = 3600;

#[utoipa::path(
    get,
    path = "/v1/request/list/",
    tag = "Requests",
    operation_id = "listChallenges",
    summary = "List challenges available on demand",
    responses(
        (status = 200, description = "Challenge names", body = ChallengeListResponse),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user), fields(team_id = %auth_user.id))]
pub async fn list_challenges(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ChallengeListResponse>, AppError> {
    auth_user.require(&[Permission::Crs])?;
    let challenges = state
        .config
        .competition
        .challenges
        .iter()
        .map(|c| c.name.clone())
        .collect();
    Ok(Json(ChallengeListResponse { challenges }))
}

#[utoipa::path(
    post,
    path = "/v1/request/{challenge_name}/",
    tag = "Requests",
    operation_id = "requestChallenge",
    summary = "Request a task for a challenge",
    description = "Schedules a scan of the named challenge delivered only to the caller. The task is a delta scan when the challenge has a base ref. The deadline is `now + duration_secs`, one hour by default.",
    params(("challenge_name" = String, Path, description = "Challenge name")),
    request_body(content = ChallengeRequest, description = "Optional duration"),
    responses(
        (status = 202, description = "Scan scheduled", body = ScheduledResponse),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Caller is not a configured team (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Unknown challenge (NOT_FOUND)", body = ErrorBody),
        (status = 429, description = "Rate limited (RATE_LIMITED)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user, body), fields(team_id = %auth_user.id))]
pub async fn request_challenge(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(challenge_name): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<ScheduledResponse>), AppError> {
    auth_user.require(&[Permission::Crs])?;
    state.rate_limiter.check("request", &auth_user.id.to_string()).await?;

    let competition = &state.config.competition;
    let challenge = competition
        .challenge(&challenge_name)
        .ok_or_else(|| AppError::NotFound("Challenge not found".into()))?;
    let team = competition
        .team(auth_user.id)
        .ok_or(AppError::PermissionDenied)?;

    // The body is optional.
    let payload: ChallengeRequest = if body.is_empty() {
        ChallengeRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::Validation(e.to_string()))?
    };
    let duration_secs = payload.duration_secs.unwrap_or(DEFAULT_DURATION_SECS);
    let deadline = i64::try_from(duration_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| Utc::now().checked_add_signed(d))
        .ok_or_else(|| AppError::field("duration_secs", "too large"))?;

    let request = ScanRequest {
        repo_url: challenge.repo_url.clone(),
        head_ref: challenge.head_ref.clone(),
        base_ref: challenge.base_ref.clone(),
        deadline,
        round_id: competition.current_round_id.clone(),
        targets: vec![team.target()],
        requested_by: Some(auth_user.id),
    };
    let tasking = state.tasking.clone();
    state.runner.run("scan", async move {
        tasking.scan(request).await.map(|_| ())
    });
    info!(challenge = %challenge_name, %deadline, "on-demand scan scheduled");

    Ok((
        StatusCode::ACCEPTED,
        Json(ScheduledResponse {
            status: "scheduled",
        }),
    ))
}
