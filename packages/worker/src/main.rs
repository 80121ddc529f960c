use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use common::audit::AuditLogger;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use worker::cli::{Cli, Command};
use worker::handlers::{
    broadcast::handle_broadcast, cancel::handle_cancel, eval::handle_eval, load_targets,
    status::handle_status,
};
use worker::{EXIT_ERROR, WorkerAppConfig, exit_code_for};

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries audit lines and exported results
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = format!("{e:#}"), "worker failed");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let config = WorkerAppConfig::load().context("Failed to load config")?;
    let audit = Arc::new(AuditLogger::stdout(config.audit.round_id.clone()));

    match cli.command {
        Command::Broadcast(args) => {
            let targets = load_targets()?;
            handle_broadcast(&args, &config, &targets, audit)
                .await
                .context("broadcast failed")?;
        }
        Command::Cancel(args) => {
            let targets = load_targets()?;
            handle_cancel(&args, &config, &targets, audit)
                .await
                .context("cancel failed")?;
        }
        Command::Status(args) => {
            let targets = load_targets()?;
            handle_status(&args, &targets, audit).await?;
        }
        Command::Eval(args) => {
            let result = handle_eval(&args, &config, audit)
                .await
                .context("evaluation failed")?;
            info!(status = %result.status, patch_tests_failed = ?result.patch_tests_failed, "evaluation finished");
            return Ok(exit_code_for(result.status));
        }
    }
    Ok(0)
}
