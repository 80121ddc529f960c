use std::sync::Arc;
use std::time::Duration;

use common::audit::{AuditEvent, AuditLogger, AuditScope, CrsStatusCheckEvent};
use common::team::DeliveryTarget;
use futures::future::join_all;
use reqwest::Client;
use tracing::{instrument, warn};

use crate::cli::StatusArgs;
use crate::error::{Result, WorkerError};

async fn check_one(client: &Client, target: &DeliveryTarget) -> CrsStatusCheckEvent {
    let url = format!("{}/status/", target.base_url.trim_end_matches('/'));
    let mut event = CrsStatusCheckEvent {
        base_url: target.base_url.clone(),
        status_code: None,
        body: None,
        error: None,
    };
    match client
        .get(&url)
        .basic_auth(&target.username, Some(&target.password))
        .send()
        .await
    {
        Ok(response) => {
            event.status_code = Some(response.status().as_u16());
            match response.text().await {
                Ok(text) => {
                    event.body = Some(
                        serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)),
                    );
                }
                Err(e) => event.error = Some(e.to_string()),
            }
        }
        Err(e) => {
            warn!(team_id = %target.team_id, error = %e, "status check failed");
            event.error = Some(e.to_string());
        }
    }
    event
}

/// Query every target's status endpoint once and audit what came back.
/// Unreachable competitors are recorded, not treated as a job failure.
#[instrument(skip_all, fields(targets = targets.len()))]
pub async fn handle_status(
    args: &StatusArgs,
    targets: &[DeliveryTarget],
    audit: Arc<AuditLogger>,
) -> Result<()> {
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| WorkerError::InvalidArgument(format!("failed to build HTTP client: {e}")))?;

    let events = join_all(targets.iter().map(|t| check_one(&client, t))).await;
    for (target, event) in targets.iter().zip(events) {
        let scope = AuditScope {
            round_id: args.round_id.clone(),
            team_id: Some(target.team_id),
            task_id: None,
        };
        audit.emit(&scope, AuditEvent::CrsStatusCheck(event));
    }
    Ok(())
}
