use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{MqAppConfig, StorageConfig};

/// Evaluation engine settings.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Directory holding `build_cr.sh`, `run_pov.sh` and `run_tests.sh`.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    /// Maven settings injected into JVM projects.
    #[serde(default = "default_settings_xml")]
    pub settings_xml: PathBuf,
    /// Where the fuzzer leaves its log after a POV run.
    #[serde(default = "default_fuzz_out_path")]
    pub fuzz_out_path: PathBuf,
    #[serde(default = "default_run_pov_timeout_secs")]
    pub run_pov_timeout_secs: u64,
    /// Wall-clock budget for a whole evaluation.
    #[serde(default = "default_eval_timeout_secs")]
    pub eval_timeout_secs: u64,
    /// Scratch root for fetched archives.
    #[serde(default = "std::env::temp_dir")]
    pub work_dir: PathBuf,
}

fn default_scripts_dir() -> PathBuf {
    "/usr/local/share/gauntlet/scripts".into()
}
fn default_settings_xml() -> PathBuf {
    "/usr/local/share/gauntlet/settings.xml".into()
}
fn default_fuzz_out_path() -> PathBuf {
    "/tmp/fuzz.out".into()
}
fn default_run_pov_timeout_secs() -> u64 {
    1800
}
fn default_eval_timeout_secs() -> u64 {
    8 * 3600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            settings_xml: default_settings_xml(),
            fuzz_out_path: default_fuzz_out_path(),
            run_pov_timeout_secs: default_run_pov_timeout_secs(),
            eval_timeout_secs: default_eval_timeout_secs(),
            work_dir: std::env::temp_dir(),
        }
    }
}

impl EngineConfig {
    pub fn run_pov_timeout(&self) -> Duration {
        Duration::from_secs(self.run_pov_timeout_secs)
    }

    pub fn eval_timeout(&self) -> Duration {
        Duration::from_secs(self.eval_timeout_secs)
    }
}

/// Outbound delivery settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Extra retry window past the deadline.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_secs() -> u64 {
    60
}
fn default_grace_secs() -> u64 {
    120
}
fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            grace_secs: default_grace_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    /// Round recorded on audit events when the caller passes none.
    #[serde(default = "default_round_id")]
    pub round_id: String,
}

fn default_round_id() -> String {
    "development".into()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            round_id: default_round_id(),
        }
    }
}

/// Worker application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl WorkerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("mq.url", "redis://localhost:6379")?
            .set_default("mq.pool_size", 5_i64)?
            .set_default("mq.result_queue_name", "eval_results")?
            .set_default("engine.run_pov_timeout_secs", 1800_i64)?
            .set_default("engine.eval_timeout_secs", 8 * 3600_i64)?
            .add_source(File::with_name(&common::config::config_path()).required(false))
            // Override from environment (e.g., GAUNTLET__STORAGE__BUCKET)
            .add_source(Environment::with_prefix("GAUNTLET").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
