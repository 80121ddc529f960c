use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// A subprocess invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `-1` when the process was killed by a signal or timed out.
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput>;
}

/// Runs commands as local child processes.
///
/// After the child exits (or is killed) its output pipes are drained for at
/// most `wait_delay`, so a grandchild holding a pipe open cannot hang us.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    wait_delay: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            wait_delay: Duration::from_secs(1),
        }
    }
}

impl ProcessRunner {
    pub fn with_wait_delay(wait_delay: Duration) -> Self {
        Self {
            wait_delay: wait_delay.max(Duration::from_secs(1)),
        }
    }
}

fn drain<R: tokio::io::AsyncRead + Unpin + Send + 'static>(
    pipe: Option<R>,
) -> tokio::task::JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        debug!(argv = ?spec.argv(), "spawning");
        let mut child = command.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let mut timed_out = false;
        let status = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => Some(status?),
                Err(_) => {
                    warn!(program = %spec.program, ?limit, "command timed out, killing");
                    timed_out = true;
                    child.start_kill()?;
                    tokio::time::timeout(self.wait_delay, child.wait())
                        .await
                        .ok()
                        .transpose()?
                }
            },
            None => Some(child.wait().await?),
        };

        let wait_delay = self.wait_delay;
        let collect = move |handle: tokio::task::JoinHandle<Vec<u8>>| async move {
            let abort = handle.abort_handle();
            match tokio::time::timeout(wait_delay, handle).await {
                Ok(Ok(buf)) => buf,
                Ok(Err(_)) => Vec::new(),
                Err(_) => {
                    abort.abort();
                    Vec::new()
                }
            }
        };
        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;

        let exit_code = match status {
            Some(status) if !timed_out => status.code().unwrap_or(-1),
            _ => -1,
        };
        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
            timed_out,
        })
    }
}
