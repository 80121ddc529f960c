use std::sync::Arc;

use common::audit::AuditLogger;
use common::storage::ContentStore;
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::dispatch::Dispatcher;
use crate::rate_limit::RateLimiter;
use crate::runner::TaskRunner;
use crate::tasking::TaskingEngine;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ContentStore>,
    pub audit: Arc<AuditLogger>,
    pub dispatcher: Arc<Dispatcher>,
    pub tasking: Arc<TaskingEngine>,
    pub runner: TaskRunner,
    pub rate_limiter: RateLimiter,
}
