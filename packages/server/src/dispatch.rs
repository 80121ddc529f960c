//! One-shot worker jobs: deliveries to teams and evaluations.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use common::eval::{EntityType, EvalEntity};
use common::team::{CREDENTIALS_ENV, CredentialsError, DeliveryTarget, encode_targets};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to encode job payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error("failed to launch job {name}: {reason}")]
    Launch { name: String, reason: String },
}

/// What the batch platform is asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub memory_gb: Option<u32>,
    pub cpus: Option<u32>,
}

impl JobSpec {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            env: Vec::new(),
            memory_gb: None,
            cpus: None,
        }
    }

    fn arg(mut self, flag: &str, value: impl ToString) -> Self {
        self.args.push(flag.to_string());
        self.args.push(value.to_string());
        self
    }

    fn flag(mut self, flag: &str) -> Self {
        self.args.push(flag.to_string());
        self
    }

    fn env(mut self, key: &str, value: impl ToString) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value following `flag` in the argument list.
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .windows(2)
            .find(|w| w[0] == flag)
            .map(|w| w[1].as_str())
    }
}

/// Starts a job and returns once the platform has accepted it.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, spec: JobSpec) -> Result<(), DispatchError>;
}

/// Runs each job as a detached local `worker` process.
pub struct ProcessLauncher {
    worker_bin: String,
}

impl ProcessLauncher {
    pub fn new(worker_bin: impl Into<String>) -> Self {
        Self {
            worker_bin: worker_bin.into(),
        }
    }
}

#[async_trait]
impl JobLauncher for ProcessLauncher {
    async fn launch(&self, spec: JobSpec) -> Result<(), DispatchError> {
        let mut cmd = tokio::process::Command::new(&self.worker_bin);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());
        if let Some(memory_gb) = spec.memory_gb {
            cmd.env("GAUNTLET_JOB_MEMORY_GB", memory_gb.to_string());
        }
        if let Some(cpus) = spec.cpus {
            cmd.env("GAUNTLET_JOB_CPUS", cpus.to_string());
        }
        let mut child = cmd.spawn().map_err(|e| DispatchError::Launch {
            name: spec.name.clone(),
            reason: e.to_string(),
        })?;

        let name = spec.name;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!(job = %name, code = ?status.code(), "job exited"),
                Err(e) => warn!(job = %name, error = %e, "failed to wait for job"),
            }
        });
        Ok(())
    }
}

/// Keeps launched jobs in memory instead of running them.
#[derive(Default)]
pub struct RecordingLauncher {
    jobs: Mutex<Vec<JobSpec>>,
    refuse: AtomicBool,
}

impl RecordingLauncher {
    /// While set, every launch is rejected and nothing is recorded.
    pub fn refuse_launches(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<JobSpec> {
        match self.jobs.lock() {
            Ok(jobs) => jobs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl JobLauncher for RecordingLauncher {
    async fn launch(&self, spec: JobSpec) -> Result<(), DispatchError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DispatchError::Launch {
                name: spec.name,
                reason: "launcher refused the job".into(),
            });
        }
        match self.jobs.lock() {
            Ok(mut jobs) => jobs.push(spec),
            Err(poisoned) => poisoned.into_inner().push(spec),
        }
        Ok(())
    }
}

/// Coordinates of the sandboxed run a POV needs.
#[derive(Debug, Clone)]
pub struct PovTarget {
    pub trigger_url: String,
    pub harness: String,
    pub sanitizer: String,
    pub engine: String,
    pub architecture: String,
}

#[derive(Debug, Clone)]
pub struct EvalJob {
    pub entity: EvalEntity,
    pub round_id: String,
    pub task_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub head_repo_url: String,
    pub base_repo_url: Option<String>,
    pub fuzz_tooling_url: String,
    pub focus: String,
    pub project_name: String,
    pub memory_gb: u32,
    pub cpus: u32,
    pub pov: Option<PovTarget>,
    pub patch_url: Option<String>,
    pub skip_patch_tests: bool,
}

/// A fresh W3C `traceparent` for a job started outside any inbound trace.
fn traceparent() -> String {
    let trace = Uuid::new_v4().simple().to_string();
    let span = &Uuid::new_v4().simple().to_string()[..16];
    format!("00-{trace}-{span}-01")
}

pub struct Dispatcher {
    launcher: Arc<dyn JobLauncher>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(launcher: Arc<dyn JobLauncher>, config: DispatchConfig) -> Self {
        Self { launcher, config }
    }

    /// Delivery stops retrying this long after the task deadline.
    fn until(&self, deadline: DateTime<Utc>) -> i64 {
        let grace = i64::try_from(self.config.delivery_grace_secs).unwrap_or(i64::MAX);
        deadline.timestamp().saturating_add(grace)
    }

    /// Deliver `payload` to every target with `POST route`.
    #[instrument(skip(self, payload, targets), fields(targets = targets.len()))]
    pub async fn broadcast<T: Serialize>(
        &self,
        route: &str,
        round_id: &str,
        task_id: Option<Uuid>,
        payload: &T,
        deadline: DateTime<Utc>,
        targets: &[DeliveryTarget],
    ) -> Result<(), DispatchError> {
        let body = serde_json::to_vec(payload)?;
        let mut spec = JobSpec::new(format!("broadcast-{}", Uuid::new_v4()))
            .flag("broadcast")
            .arg("--route", route)
            .arg("--round-id", round_id)
            .arg("--until", self.until(deadline))
            .arg("--payload", STANDARD.encode(body))
            .env(CREDENTIALS_ENV, encode_targets(targets)?);
        if let Some(task_id) = task_id {
            spec = spec.arg("--task-id", task_id);
        }
        self.launcher.launch(spec).await
    }

    /// Ask every target to stop working on `route` with `DELETE route`.
    #[instrument(skip(self, targets), fields(targets = targets.len()))]
    pub async fn cancel(
        &self,
        route: &str,
        round_id: &str,
        task_id: Option<Uuid>,
        deadline: DateTime<Utc>,
        targets: &[DeliveryTarget],
    ) -> Result<(), DispatchError> {
        let mut spec = JobSpec::new(format!("cancel-{}", Uuid::new_v4()))
            .flag("cancel")
            .arg("--route", route)
            .arg("--round-id", round_id)
            .arg("--until", self.until(deadline))
            .env(CREDENTIALS_ENV, encode_targets(targets)?);
        if let Some(task_id) = task_id {
            spec = spec.arg("--task-id", task_id);
        }
        self.launcher.launch(spec).await
    }

    /// One sweep of `GET /status/` over `targets`.
    pub async fn status_check(
        &self,
        round_id: &str,
        targets: &[DeliveryTarget],
    ) -> Result<(), DispatchError> {
        let spec = JobSpec::new(format!("status-{}", Uuid::new_v4()))
            .flag("status")
            .arg("--round-id", round_id)
            .env(CREDENTIALS_ENV, encode_targets(targets)?);
        self.launcher.launch(spec).await
    }

    #[instrument(skip(self, job), fields(entity_id = %job.entity.entity_id))]
    pub async fn eval(&self, job: EvalJob) -> Result<(), DispatchError> {
        let entity_flag = match job.entity.entity_type {
            EntityType::Pov => "--pov-id",
            EntityType::Patch => "--patch-id",
            EntityType::Job => "--job-id",
        };
        let mut spec = JobSpec::new(format!("eval-{}", job.entity.entity_id))
            .flag("eval")
            .arg(entity_flag, job.entity.entity_id)
            .arg("--head-repo-url", &job.head_repo_url)
            .arg("--oss-fuzz-url", &job.fuzz_tooling_url)
            .arg("--focus", &job.focus)
            .arg("--project-name", &job.project_name);

        if let Some(base) = &job.base_repo_url {
            spec = spec.arg("--base-repo-url", base);
        }
        match &job.pov {
            Some(pov) => {
                spec = spec
                    .arg("--architecture", &pov.architecture)
                    .arg("--trigger-url", &pov.trigger_url)
                    .arg("--harness-name", &pov.harness)
                    .arg("--sanitizer", &pov.sanitizer)
                    .arg("--engine", &pov.engine);
            }
            None => spec = spec.arg("--architecture", "x86_64"),
        }
        if let Some(patch_url) = &job.patch_url {
            spec = spec
                .arg("--patch-url", patch_url)
                .arg("--allowed-languages", "c")
                .arg("--allowed-languages", "java");
        }
        if job.skip_patch_tests {
            spec = spec.flag("--skip-patch-tests");
        }
        if job.entity.entity_type == EntityType::Pov {
            spec = spec.flag("--archive-s3");
        }

        spec = spec.env("GAUNTLET_ROUND_ID", &job.round_id);
        if let Some(task_id) = job.task_id {
            spec = spec.env("GAUNTLET_TASK_ID", task_id);
        }
        if let Some(team_id) = job.team_id {
            spec = spec.env("GAUNTLET_TEAM_ID", team_id);
        }
        spec = spec.env("TRACEPARENT", traceparent());
        for (key, value) in &self.config.eval_env {
            spec = spec.env(key, value);
        }
        spec.memory_gb = Some(job.memory_gb);
        spec.cpus = Some(job.cpus);

        self.launcher.launch(spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::team::decode_targets;
    use std::collections::HashMap;

    fn dispatcher() -> (Dispatcher, Arc<RecordingLauncher>) {
        let launcher = Arc::new(RecordingLauncher::default());
        let config = DispatchConfig {
            worker_bin: "worker".into(),
            eval_env: HashMap::from([("GAUNTLET__MQ__URL".into(), "redis://mq".into())]),
            delivery_grace_secs: 120,
        };
        (Dispatcher::new(launcher.clone(), config), launcher)
    }

    fn target() -> DeliveryTarget {
        DeliveryTarget {
            team_id: Uuid::now_v7(),
            base_url: "http://crs".into(),
            username: "u".into(),
            password: "p".into(),
        }
    }

    #[tokio::test]
    async fn broadcast_carries_payload_deadline_and_credentials() {
        let (dispatcher, launcher) = dispatcher();
        let deadline = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let task_id = Uuid::now_v7();
        dispatcher
            .broadcast(
                "/v1/task/",
                "final",
                Some(task_id),
                &serde_json::json!({"tasks": []}),
                deadline,
                &[target()],
            )
            .await
            .unwrap();

        let job = &launcher.jobs()[0];
        assert_eq!(job.args[0], "broadcast");
        assert_eq!(job.arg_value("--until"), Some("1700000120"));
        assert_eq!(job.arg_value("--task-id"), Some(task_id.to_string().as_str()));
        let payload = STANDARD.decode(job.arg_value("--payload").unwrap()).unwrap();
        assert_eq!(payload, br#"{"tasks":[]}"#);
        let targets = decode_targets(job.env_value(CREDENTIALS_ENV).unwrap()).unwrap();
        assert_eq!(targets[0].base_url, "http://crs");
    }

    #[tokio::test]
    async fn patch_eval_allows_c_and_java_only() {
        let (dispatcher, launcher) = dispatcher();
        let entity = EvalEntity {
            entity_type: EntityType::Patch,
            entity_id: Uuid::now_v7(),
        };
        dispatcher
            .eval(EvalJob {
                entity,
                round_id: "final".into(),
                task_id: Some(Uuid::now_v7()),
                team_id: Some(Uuid::now_v7()),
                head_repo_url: "http://store/head".into(),
                base_repo_url: None,
                fuzz_tooling_url: "http://store/fuzz".into(),
                focus: "libpng".into(),
                project_name: "libpng".into(),
                memory_gb: 8,
                cpus: 4,
                pov: None,
                patch_url: Some("http://store/patch".into()),
                skip_patch_tests: false,
            })
            .await
            .unwrap();

        let job = &launcher.jobs()[0];
        assert_eq!(job.arg_value("--patch-id"), Some(entity.entity_id.to_string().as_str()));
        let languages: Vec<_> = job
            .args
            .windows(2)
            .filter(|w| w[0] == "--allowed-languages")
            .map(|w| w[1].clone())
            .collect();
        assert_eq!(languages, vec!["c", "java"]);
        assert!(!job.args.iter().any(|a| a == "--archive-s3"));
        assert_eq!(job.env_value("GAUNTLET__MQ__URL"), Some("redis://mq"));
        assert!(job.env_value("TRACEPARENT").unwrap().starts_with("00-"));
        assert_eq!((job.memory_gb, job.cpus), (Some(8), Some(4)));
    }

    #[test]
    fn traceparent_is_well_formed() {
        let tp = traceparent();
        let parts: Vec<_> = tp.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].len(), 32);
        assert_eq!(parts[2].len(), 16);
    }
}
