pub mod config;
pub mod consumers;
pub mod database;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod runner;
pub mod seed;
pub mod state;
pub mod status_check;
pub mod tasking;
pub mod utils;

use axum::extract::DefaultBodyLimit;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gauntlet Competition API",
        version = "1.0.0",
        description = "Tasking, submission and evaluation API for competing reasoning systems"
    ),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Submissions", description = "Vulnerability, patch, SARIF and freeform submissions"),
        (name = "Bundles", description = "Grouping submissions that describe one issue"),
        (name = "Requests", description = "On-demand challenge tasking"),
        (name = "Competition", description = "Competition management"),
        (name = "Job Runner", description = "Ad-hoc evaluation jobs"),
        (name = "Webhooks", description = "Source host event receivers"),
    ),
    modifiers(&SecurityAddon),
)]
struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_default();
        components.add_security_scheme(
            "basic",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Basic).build()),
        );
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> axum::Router {
    let body_limit = state.config.server.body_limit;
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(routes::api_routes())
        .split_for_parts();

    router
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
