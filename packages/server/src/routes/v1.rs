use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::handlers;
use crate::state::AppState;

/// Routes called by competitor systems.
pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::ping::ping))
        .merge(submission_routes())
        .merge(bundle_routes())
        .merge(request_routes())
}

fn submission_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::pov::submit_pov))
        .routes(routes!(handlers::pov::get_pov))
        .routes(routes!(handlers::patch::submit_patch))
        .routes(routes!(handlers::patch::get_patch))
        .routes(routes!(handlers::sarif::submit_sarif))
        .routes(routes!(handlers::sarif::submit_assessment))
        .routes(routes!(handlers::freeform::submit_freeform))
}

fn bundle_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::bundle::submit_bundle))
        .routes(routes!(
            handlers::bundle::get_bundle,
            handlers::bundle::update_bundle,
            handlers::bundle::delete_bundle
        ))
}

fn request_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::request::list_challenges))
        .routes(routes!(handlers::request::request_challenge))
}
