mod v1;

use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::handlers;
use crate::state::AppState;

pub fn api_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .merge(v1::routes())
        .merge(competition_routes())
        .merge(jobrunner_routes())
        .routes(routes!(handlers::webhook::github))
}

/// Operator endpoints.
fn competition_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::competition::out_of_budget))
        .routes(routes!(handlers::competition::cancel_all))
        .routes(routes!(handlers::competition::cancel_task))
        .routes(routes!(handlers::sarif::create_broadcast))
}

fn jobrunner_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::job::create_job))
        .routes(routes!(handlers::job::create_jobs_bulk))
        .routes(routes!(handlers::job::get_job))
}
