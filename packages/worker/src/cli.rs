use clap::{ArgGroup, Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "worker", about = "Gauntlet one-shot jobs: delivery and evaluation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deliver a payload to every competitor endpoint.
    Broadcast(BroadcastArgs),
    /// Tell every competitor endpoint to drop work on a route.
    Cancel(CancelArgs),
    /// Evaluate one POV, patch or job.
    Eval(Box<EvalArgs>),
    /// Query every competitor's status endpoint once.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct BroadcastArgs {
    #[arg(long)]
    pub route: String,
    #[arg(long, default_value = "POST")]
    pub method: String,
    #[arg(long, env = "GAUNTLET_ROUND_ID")]
    pub round_id: Option<String>,
    #[arg(long, env = "GAUNTLET_TASK_ID")]
    pub task_id: Option<Uuid>,
    /// Base64-encoded request body.
    #[arg(long)]
    pub payload: Option<String>,
    /// Unix seconds after which delivery stops retrying (plus grace).
    #[arg(long)]
    pub until: i64,
}

#[derive(Debug, Args)]
pub struct CancelArgs {
    #[arg(long)]
    pub route: String,
    #[arg(long)]
    pub until: i64,
    #[arg(long, env = "GAUNTLET_ROUND_ID")]
    pub round_id: Option<String>,
    #[arg(long, env = "GAUNTLET_TASK_ID")]
    pub task_id: Option<Uuid>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(long, env = "GAUNTLET_ROUND_ID")]
    pub round_id: Option<String>,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("entity").required(true).args(["pov_id", "patch_id", "job_id"])))]
pub struct EvalArgs {
    #[arg(long)]
    pub head_repo_url: String,
    #[arg(long)]
    pub base_repo_url: Option<String>,
    #[arg(long)]
    pub oss_fuzz_url: String,
    #[arg(long)]
    pub focus: String,
    #[arg(long)]
    pub project_name: String,
    #[arg(long, default_value = "x86_64")]
    pub architecture: String,

    #[arg(long)]
    pub trigger_url: Option<String>,
    #[arg(long)]
    pub sanitizer: Option<String>,
    #[arg(long)]
    pub harness_name: Option<String>,
    #[arg(long)]
    pub engine: Option<String>,

    #[arg(long)]
    pub patch_url: Option<String>,
    #[arg(long = "allowed-languages")]
    pub allowed_languages: Vec<String>,
    #[arg(long)]
    pub skip_patch_tests: bool,

    #[arg(long)]
    pub pov_id: Option<Uuid>,
    #[arg(long)]
    pub patch_id: Option<Uuid>,
    #[arg(long)]
    pub job_id: Option<Uuid>,

    /// Also print every result message to stdout as a JSON line.
    #[arg(long)]
    pub export_results: bool,
    /// Accepted for compatibility; artifacts always go to the content store.
    #[arg(long)]
    pub archive_s3: bool,

    #[arg(long, env = "GAUNTLET_ROUND_ID")]
    pub round_id: Option<String>,
    #[arg(long, env = "GAUNTLET_TASK_ID")]
    pub task_id: Option<Uuid>,
    #[arg(long, env = "GAUNTLET_TEAM_ID")]
    pub team_id: Option<Uuid>,
    #[arg(long, env = "TRACEPARENT")]
    pub traceparent: Option<String>,
}
