use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, instrument, warn};

use crate::config::{ChallengeConfig, CompetitionConfig};
use crate::error::{AppError, ErrorBody};
use crate::models::shared::StatusResponse;
use crate::models::webhook::{PullRequestEvent, PushEvent, Repository};
use crate::state::AppState;
use crate::tasking::ScanRequest;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";

const DELTA_ACTIONS: [&str; 3] = ["opened", "synchronize", "reopened"];
const NULL_SHA: &str = "0000000000000000000000000000000000000000";

/// Check `sha256=<hex>` against the HMAC-SHA256 of `body`. The comparison is
/// constant time. An empty secret accepts nothing.
pub fn verify_signature(secret: &str, header: Option<&str>, body: &[u8]) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(expected) = header
        .and_then(|h| h.strip_prefix("sha256="))
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
    else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn challenge_for<'a>(
    competition: &'a CompetitionConfig,
    repo: &Repository,
) -> Option<&'a ChallengeConfig> {
    competition
        .challenges
        .iter()
        .find(|c| repo.matches(&c.repo_url))
}

/// Translate a webhook delivery into the scan it asks for, if any.
pub fn plan_scan(
    competition: &CompetitionConfig,
    event: &str,
    body: &[u8],
) -> Result<Option<ScanRequest>, AppError> {
    let (repo_url, head_ref, base_ref) = match event {
        "pull_request" => {
            let ev: PullRequestEvent = serde_json::from_slice(body)
                .map_err(|e| AppError::Validation(format!("invalid pull_request event: {e}")))?;
            if !DELTA_ACTIONS.contains(&ev.action.as_str()) {
                return Ok(None);
            }
            let Some(challenge) = challenge_for(competition, &ev.repository) else {
                return Ok(None);
            };
            (
                challenge.repo_url.clone(),
                ev.pull_request.head.sha,
                Some(ev.pull_request.base.sha),
            )
        }
        "push" => {
            let ev: PushEvent = serde_json::from_slice(body)
                .map_err(|e| AppError::Validation(format!("invalid push event: {e}")))?;
            if !ev.is_default_branch() || ev.after == NULL_SHA {
                return Ok(None);
            }
            let Some(challenge) = challenge_for(competition, &ev.repository) else {
                return Ok(None);
            };
            (challenge.repo_url.clone(), ev.after, None)
        }
        _ => return Ok(None),
    };

    let duration = i64::try_from(competition.task_duration_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| AppError::Internal("task duration out of range".into()))?;
    Ok(Some(ScanRequest {
        repo_url,
        head_ref,
        base_ref,
        deadline: Utc::now() + duration,
        round_id: competition.current_round_id.clone(),
        targets: competition.tasked_targets(),
        requested_by: None,
    }))
}

#[utoipa::path(
    post,
    path = "/webhook/github/",
    tag = "Webhooks",
    operation_id = "githubWebhook",
    summary = "GitHub webhook receiver",
    description = "Verifies `X-Hub-Signature-256`. A pull request opened, synchronized or reopened on a challenge repository schedules a delta scan; a push to its default branch schedules a full scan. Other events are acknowledged and ignored.",
    request_body(content = String, description = "Raw GitHub event payload"),
    responses(
        (status = 200, description = "Acknowledged", body = StatusResponse),
        (status = 202, description = "Scan scheduled", body = StatusResponse),
        (status = 400, description = "Malformed payload (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Bad signature (UNAUTHORIZED)", body = ErrorBody),
    ),
)]
#[instrument(skip_all, fields(event))]
pub async fn github(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<StatusResponse>), AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if !verify_signature(&state.config.tasking.webhook_secret, signature, &body) {
        warn!("webhook signature rejected");
        return Err(AppError::Unauthorized);
    }

    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    tracing::Span::current().record("event", event);

    if event == "ping" {
        return Ok((
            StatusCode::OK,
            Json(StatusResponse {
                status: "pong".into(),
            }),
        ));
    }

    let Some(request) = plan_scan(&state.config.competition, event, &body)? else {
        return Ok((
            StatusCode::OK,
            Json(StatusResponse {
                status: "ignored".into(),
            }),
        ));
    };

    info!(repo = %request.repo_url, head = %request.head_ref, base = ?request.base_ref, "scan scheduled from webhook");
    let tasking = state.tasking.clone();
    state
        .runner
        .run("scan", async move { tasking.scan(request).await.map(|_| ()) });

    Ok((
        StatusCode::ACCEPTED,
        Json(StatusResponse {
            status: "scheduled".into(),
        }),
    ))
}
