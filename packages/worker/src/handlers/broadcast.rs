use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use common::audit::{AuditEvent, AuditLogger, AuditScope, BroadcastEvent};
use common::team::DeliveryTarget;
use reqwest::Method;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::cli::BroadcastArgs;
use crate::config::WorkerAppConfig;
use crate::delivery::{Delivery, DeliveryEngine};
use crate::error::{Result, WorkerError};

pub(crate) fn deadline(until: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(until, 0)
        .ok_or_else(|| WorkerError::InvalidArgument(format!("--until {until} is out of range")))
}

/// Deliver to every target and record one broadcast audit event per target.
pub(crate) async fn deliver_audited(
    config: &WorkerAppConfig,
    audit: Arc<AuditLogger>,
    delivery: Delivery,
    targets: &[DeliveryTarget],
    round_id: Option<String>,
    task_id: Option<Uuid>,
) -> Result<()> {
    let engine = DeliveryEngine::new(&config.delivery)?;
    let method = delivery.method.to_string();
    let route = delivery.route.clone();

    engine
        .deliver(&delivery, targets, |target, retries, error| {
            let scope = AuditScope {
                round_id: round_id.clone(),
                team_id: Some(target.team_id),
                task_id,
            };
            let event = BroadcastEvent {
                method: method.clone(),
                route: route.clone(),
                retries,
                error: error.map(ToString::to_string),
            };
            audit.emit(
                &scope,
                if error.is_some() {
                    AuditEvent::BroadcastFailed(event)
                } else {
                    AuditEvent::BroadcastSucceeded(event)
                },
            );
        })
        .await?;
    Ok(())
}

#[instrument(skip_all, fields(route = %args.route, task_id = ?args.task_id))]
pub async fn handle_broadcast(
    args: &BroadcastArgs,
    config: &WorkerAppConfig,
    targets: &[DeliveryTarget],
    audit: Arc<AuditLogger>,
) -> Result<()> {
    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .map_err(|_| WorkerError::InvalidArgument(format!("bad method {}", args.method)))?;
    let payload = args
        .payload
        .as_deref()
        .map(|p| STANDARD.decode(p.trim()))
        .transpose()
        .map_err(|e| WorkerError::InvalidArgument(format!("payload is not base64: {e}")))?;
    let delivery = Delivery {
        method,
        route: args.route.clone(),
        payload,
        deadline: deadline(args.until)?,
    };

    info!(targets = targets.len(), "broadcasting");
    deliver_audited(
        config,
        audit,
        delivery,
        targets,
        args.round_id.clone(),
        args.task_id,
    )
    .await
}
