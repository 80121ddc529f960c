use std::sync::Arc;

use common::audit::AuditLogger;
use common::team::DeliveryTarget;
use reqwest::Method;
use tracing::{info, instrument};

use super::broadcast::{deadline, deliver_audited};
use crate::cli::CancelArgs;
use crate::config::WorkerAppConfig;
use crate::delivery::Delivery;
use crate::error::Result;

#[instrument(skip_all, fields(route = %args.route))]
pub async fn handle_cancel(
    args: &CancelArgs,
    config: &WorkerAppConfig,
    targets: &[DeliveryTarget],
    audit: Arc<AuditLogger>,
) -> Result<()> {
    let delivery = Delivery {
        method: Method::DELETE,
        route: args.route.clone(),
        payload: None,
        deadline: deadline(args.until)?,
    };
    info!(targets = targets.len(), "cancelling");
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
