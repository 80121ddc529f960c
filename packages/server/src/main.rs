use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::audit::AuditLogger;
use common::storage::build_content_store;
use mq::{MqConfig, init_mq};
use server::config::AppConfig;
use server::consumers::consume_eval_results;
use server::database::init_db;
use server::dispatch::{Dispatcher, ProcessLauncher};
use server::rate_limit::{CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore};
use server::runner::TaskRunner;
use server::seed::{ensure_indexes, seed_auth};
use server::state::AppState;
use server::tasking::TaskingEngine;
use server::{build_router, status_check};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(AppConfig::load().context("Failed to load config")?);

    let db = init_db(&config.database)
        .await
        .context("Failed to connect to database")?;
    seed_auth(&db, &config.auth.bootstrap)
        .await
        .context("Failed to seed credentials")?;
    ensure_indexes(&db).await?;

    let store = build_content_store(&config.storage)
        .await
        .context("Failed to initialize content store")?;
    let audit = Arc::new(AuditLogger::stdout(
        config.competition.current_round_id.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(ProcessLauncher::new(config.dispatch.worker_bin.clone())),
        config.dispatch.clone(),
    ));

    let counters: Arc<dyn CounterStore> = match &config.auth.redis_url {
        Some(url) => Arc::new(RedisCounterStore::new(url).context("Invalid rate limit store URL")?),
        None => Arc::new(MemoryCounterStore::default()),
    };
    let rate_limiter = RateLimiter::new(
        counters,
        config.auth.rate_limit_per_minute,
        config.auth.rate_limit_fail_open,
    );

    let tasking = Arc::new(TaskingEngine::new(
        db.clone(),
        store.clone(),
        audit.clone(),
        dispatcher.clone(),
        config.tasking.clone(),
    ));
    let runner = TaskRunner::new();

    let mq = Arc::new(
        init_mq(MqConfig::from(&config.mq))
            .await
            .context("Failed to connect to message queue")?,
    );
    tokio::spawn(consume_eval_results(
        db.clone(),
        audit.clone(),
        mq,
        config.mq.result_queue_name.clone(),
    ));

    let stop = CancellationToken::new();
    status_check::start(
        &runner,
        dispatcher.clone(),
        config.competition.clone(),
        Duration::from_secs(config.status_check.interval_secs),
        stop.clone(),
    );

    let state = AppState {
        db,
        config: config.clone(),
        store,
        audit,
        dispatcher,
        tasking,
        runner: runner.clone(),
        rate_limiter,
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, round = %config.competition.current_round_id, "gauntlet server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    stop.cancel();
    let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    if let Err(e) = runner.shutdown(timeout).await {
        warn!(error = %e, "background work still running at shutdown");
    }
    info!("shutdown complete");
    Ok(())
}
