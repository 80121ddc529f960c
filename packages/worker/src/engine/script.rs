use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use common::challenge::{ChallengeDescriptor, ProjectDescriptor};
use common::language::Identifier;
use tracing::{info, instrument, warn};

use super::error::EvalError;
use super::patch::parse_unified_diff;
use super::recorder::Recorder;
use super::runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
use super::{Engine, Params};
use crate::config::EngineConfig;

/// Exit code the helper scripts use for "the submission is at fault".
const EXIT_SUBMISSION_FAILED: i32 = 202;
const POV_REPEATS_WITHOUT_CRASH: usize = 3;
const MAVEN_SETTINGS_LINE: &str = "COPY settings.xml /root/.m2/settings.xml";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub scripts_dir: PathBuf,
    pub settings_xml: PathBuf,
    pub fuzz_out_path: PathBuf,
    pub run_pov_timeout: Duration,
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            scripts_dir: config.scripts_dir.clone(),
            settings_xml: config.settings_xml.clone(),
            fuzz_out_path: config.fuzz_out_path.clone(),
            run_pov_timeout: config.run_pov_timeout(),
        }
    }
}

/// Engine driving the challenge helper scripts (`build_cr.sh`, `run_pov.sh`,
/// `run_tests.sh`) through a [`CommandRunner`].
pub struct ScriptEngine<R = ProcessRunner> {
    runner: R,
    recorder: Recorder,
    settings: EngineSettings,
    identifier: Identifier,
}

impl<R: CommandRunner> ScriptEngine<R> {
    pub fn new(runner: R, recorder: Recorder, settings: EngineSettings) -> Self {
        Self {
            runner,
            recorder,
            settings,
            identifier: Identifier::default(),
        }
    }

    fn script(&self, name: &str) -> String {
        self.settings.scripts_dir.join(name).to_string_lossy().into_owned()
    }

    async fn exec(&self, spec: CommandSpec, params: &Params) -> Result<CommandOutput, EvalError> {
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| EvalError::fatal(format!("failed to run {}: {e}", spec.program)))?;
        self.recorder
            .command_result(&spec, &output, params.result_context)
            .await?;
        Ok(output)
    }

    async fn inject_maven_settings(&self, project_dir: &Path) -> Result<(), EvalError> {
        tokio::fs::copy(&self.settings.settings_xml, project_dir.join("settings.xml")).await?;
        let dockerfile = project_dir.join("Dockerfile");
        let mut contents = tokio::fs::read_to_string(&dockerfile).await?;
        if !contents.lines().any(|l| l.trim() == MAVEN_SETTINGS_LINE) {
            if !contents.ends_with('\n') {
                contents.push('\n');
            }
            contents.push_str(MAVEN_SETTINGS_LINE);
            contents.push('\n');
            tokio::fs::write(&dockerfile, contents).await?;
        }
        Ok(())
    }

    async fn archive_fuzz_out(&self, params: &Params) -> Result<(), EvalError> {
        let path = &self.settings.fuzz_out_path;
        if tokio::fs::try_exists(path).await? {
            let context = params.result_context;
            self.recorder
                .artifact(path, context.fuzz_out_kind(), context)
                .await?;
        }
        Ok(())
    }
}

/// Map a build script result onto the evaluation error taxonomy.
pub(crate) fn classify_build(output: &CommandOutput) -> Result<(), EvalError> {
    match output.exit_code {
        0 if !output.timed_out => Ok(()),
        EXIT_SUBMISSION_FAILED => {
            if output.stderr_str().contains("Unable to fetch some archives") {
                Err(EvalError::Transient("apt_unreachable".into()))
            } else if output.stdout_str().contains("Could not transfer") {
                Err(EvalError::Transient("maven_unreachable".into()))
            } else {
                Err(EvalError::failed("building_failed"))
            }
        }
        code => Err(EvalError::fatal(format!(
            "building_errored: build exited with {code}"
        ))),
    }
}

fn is_safe_relative(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[async_trait]
impl<R: CommandRunner> Engine for ScriptEngine<R> {
    #[instrument(skip_all, fields(project = %params.project_name, context = ?params.result_context))]
    async fn check(&self, params: &Params) -> Result<(), EvalError> {
        if params.architecture != "x86_64" {
            return Err(EvalError::failed(format!(
                "unsupported architecture '{}'",
                params.architecture
            )));
        }
        if let Some(engine) = params.engine.as_deref().filter(|e| *e != "libfuzzer") {
            return Err(EvalError::failed(format!("unsupported engine '{engine}'")));
        }

        let project = ProjectDescriptor::load(&params.fuzz_tooling_dir, &params.project_name).await?;
        if let Some(sanitizer) = &params.sanitizer {
            if !project.sanitizers.contains(sanitizer) {
                return Err(EvalError::failed(format!(
                    "sanitizer '{sanitizer}' is not enabled for {}",
                    params.project_name
                )));
            }
        }
        if let Some(harness) = &params.harness {
            let challenge = ChallengeDescriptor::load(&params.focus_dir()).await?;
            if !challenge.has_harness(harness) {
                return Err(EvalError::failed(format!("unknown harness '{harness}'")));
            }
        }
        if project.is_jvm() {
            self.inject_maven_settings(&params.project_dir()).await?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(project = %params.project_name, context = ?params.result_context))]
    async fn build(&self, params: &Params) -> Result<(), EvalError> {
        let mut spec = CommandSpec::new(self.script("build_cr.sh")).args([
            "-p".to_string(),
            params.project_name.clone(),
            "-r".to_string(),
            params.focus_dir().to_string_lossy().into_owned(),
            "-o".to_string(),
            params.fuzz_tooling_dir.to_string_lossy().into_owned(),
            "-a".to_string(),
            params.architecture.clone(),
        ]);
        if let Some(sanitizer) = &params.sanitizer {
            spec = spec.args(["-s", sanitizer]);
        }
        let output = self.exec(spec, params).await?;
        classify_build(&output)?;
        info!("build succeeded");
        Ok(())
    }

    #[instrument(skip_all, fields(project = %params.project_name, context = ?params.result_context, crash_expected))]
    async fn run_pov(
        &self,
        params: &Params,
        trigger: &Path,
        crash_expected: bool,
    ) -> Result<(), EvalError> {
        let harness = params
            .harness
            .as_deref()
            .ok_or_else(|| EvalError::fatal("run_pov requires a harness"))?;
        let repeats = if crash_expected {
            1
        } else {
            POV_REPEATS_WITHOUT_CRASH
        };
        let timeout = self.settings.run_pov_timeout;

        for run in 1..=repeats {
            match tokio::fs::remove_file(&self.settings.fuzz_out_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            let mut spec = CommandSpec::new(self.script("run_pov.sh"))
                .args([
                    "-p",
                    &params.project_name,
                    "-o",
                    &params.fuzz_tooling_dir.to_string_lossy(),
                    "-f",
                    harness,
                    "-e",
                    params.engine.as_deref().unwrap_or("libfuzzer"),
                    "-s",
                    params.sanitizer.as_deref().unwrap_or("address"),
                    "-a",
                    &params.architecture,
                    "-t",
                    &trigger.to_string_lossy(),
                    "-T",
                    &timeout.as_secs().to_string(),
                ])
                // leave the script time to report its own timeout
                .timeout(timeout + Duration::from_secs(60));
            if crash_expected {
                spec = spec.arg("-x");
            }

            let output = self.exec(spec, params).await?;
            self.archive_fuzz_out(params).await?;

            match output.exit_code {
                0 if !output.timed_out => {
                    info!(run, "pov run matched expectation");
                }
                EXIT_SUBMISSION_FAILED => {
                    let reason = if crash_expected {
                        "pov did not crash"
                    } else {
                        "pov crashed"
                    };
                    warn!(run, reason, "pov run did not match expectation");
                    return Err(EvalError::failed(reason));
                }
                code => {
                    return Err(EvalError::fatal(format!(
                        "run_pov exited with {code}{}",
                        if output.timed_out { " (timed out)" } else { "" }
                    )));
                }
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(project = %params.project_name))]
    async fn apply_patch(&self, params: &Params, patch: &Path) -> Result<(), EvalError> {
        let raw = tokio::fs::read(patch).await?;
        let text = String::from_utf8(raw)
            .map_err(|_| EvalError::failed("patch is not valid UTF-8"))?;
        let files = parse_unified_diff(&text)
            .map_err(|e| EvalError::failed(format!("unparseable patch: {e}")))?;

        let focus = params.focus_dir();
        for change in &files {
            for path in change.paths() {
                if !is_safe_relative(path) {
                    return Err(EvalError::failed(format!(
                        "patch path '{path}' escapes the repository"
                    )));
                }
                let content = match tokio::fs::read(focus.join(path)).await {
                    Ok(content) => content,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                    Err(e) => return Err(e.into()),
                };
                let language = self.identifier.identify(path, &content);
                if !params.allowed_languages.contains(&language) {
                    return Err(EvalError::failed(format!(
                        "patch touches '{path}' ({language}), which is not an allowed language"
                    )));
                }
            }
        }

        let patch = tokio::fs::canonicalize(patch).await?;
        let spec = CommandSpec::new("git")
            .arg("apply")
            .arg(patch.to_string_lossy())
            .cwd(&focus);
        let output = self.exec(spec, params).await?;
        if output.exit_code != 0 {
            return Err(EvalError::failed(format!(
                "patch does not apply: {}",
                output.stderr_str().trim()
            )));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(project = %params.project_name, success_expected))]
    async fn run_tests(&self, params: &Params, success_expected: bool) -> Result<(), EvalError> {
        let spec = CommandSpec::new(self.script("run_tests.sh")).args([
            "-p".to_string(),
            params.project_name.clone(),
            "-r".to_string(),
            params.focus_dir().to_string_lossy().into_owned(),
        ]);
        let output = self.exec(spec, params).await?;
        match (output.exit_code, success_expected) {
            (0, true) | (EXIT_SUBMISSION_FAILED, false) => Ok(()),
            (EXIT_SUBMISSION_FAILED, true) => {
                Err(EvalError::tests_failed("functionality tests failed"))
            }
            (0, false) => Err(EvalError::tests_failed("functionality tests unexpectedly passed")),
            (code, _) => Err(EvalError::fatal(format!("run_tests exited with {code}"))),
        }
    }
}
