use axum::Json;
use tracing::instrument;

use crate::models::competition::PingResponse;

#[utoipa::path(
    get,
    path = "/v1/ping/",
    tag = "Health",
    operation_id = "ping",
    summary = "Liveness check",
    responses((status = 200, description = "Service is ready", body = PingResponse)),
)]
#[instrument]
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { status: "ready" })
}
