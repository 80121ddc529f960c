use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::TaskingError;

/// Rewrite SSH remotes to HTTPS so token auth applies.
pub fn https_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("git@")
        && let Some((host, path)) = rest.split_once(':')
    {
        return format!("https://{host}/{path}");
    }
    if let Some(rest) = url.strip_prefix("ssh://") {
        let rest = rest.split_once('@').map_or(rest, |(_, r)| r);
        return format!("https://{rest}");
    }
    url.to_string()
}

/// `https_url` with the token spliced in as basic-auth userinfo.
pub fn credentialed_url(url: &str, token: Option<&str>) -> String {
    let url = https_url(url);
    match (token, url.strip_prefix("https://")) {
        (Some(token), Some(rest)) if !token.is_empty() => {
            format!("https://x-access-token:{token}@{rest}")
        }
        _ => url,
    }
}

/// Directory name a clone of `url` lands in.
pub fn repo_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

pub struct Git {
    token: Option<String>,
}

impl Git {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    async fn run(&self, cwd: Option<&Path>, args: &[&str]) -> Result<Vec<u8>, TaskingError> {
        self.run_allowing(cwd, args, &[0]).await
    }

    async fn run_allowing(
        &self,
        cwd: Option<&Path>,
        args: &[&str],
        ok_codes: &[i32],
    ) -> Result<Vec<u8>, TaskingError> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd.output().await?;
        let code = output.status.code().unwrap_or(-1);
        if !ok_codes.contains(&code) {
            // Never echo the credentialed URL back into errors.
            let shown: Vec<String> = args
                .iter()
                .map(|a| match &self.token {
                    Some(t) if !t.is_empty() => a.replace(t.as_str(), "***"),
                    _ => a.to_string(),
                })
                .collect();
            return Err(TaskingError::Git {
                args: shown.join(" "),
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(args = ?args.first(), code, "git finished");
        Ok(output.stdout)
    }

    pub async fn clone(&self, url: &str, dest: &Path) -> Result<(), TaskingError> {
        let remote = credentialed_url(url, self.token.as_deref());
        let dest = dest.display().to_string();
        self.run(None, &["clone", "--quiet", &remote, &dest]).await?;
        Ok(())
    }

    pub async fn checkout(&self, repo: &Path, reference: &str) -> Result<(), TaskingError> {
        self.run(Some(repo), &["checkout", "--quiet", reference])
            .await?;
        Ok(())
    }

    pub async fn rev_parse(&self, repo: &Path, reference: &str) -> Result<String, TaskingError> {
        let out = self.run(Some(repo), &["rev-parse", reference]).await?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    /// Point `origin` at the credential-less URL before the clone is archived.
    pub async fn scrub_origin(&self, repo: &Path, url: &str) -> Result<(), TaskingError> {
        self.run(Some(repo), &["remote", "set-url", "origin", &https_url(url)])
            .await?;
        Ok(())
    }

    /// `git diff --binary --no-color base head`, excluding `excluded` paths.
    pub async fn diff(
        &self,
        repo: &Path,
        base: &str,
        head: &str,
        excluded: &[String],
    ) -> Result<Vec<u8>, TaskingError> {
        let excludes: Vec<String> = excluded.iter().map(|p| format!(":(exclude){p}")).collect();
        let mut args = vec!["diff", "--binary", "--no-color", base, head, "--"];
        args.extend(excludes.iter().map(String::as_str));
        // Exit code 1 only signals that a difference exists.
        self.run_allowing(Some(repo), &args, &[0, 1]).await
    }
}
