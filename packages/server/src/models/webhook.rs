//! The subset of GitHub webhook payloads that drive scans.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub clone_url: String,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub ssh_url: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl Repository {
    /// Whether `url` names this repository in any of its forms.
    pub fn matches(&self, url: &str) -> bool {
        let norm = |u: &str| {
            crate::tasking::git::https_url(u)
                .trim_end_matches('/')
                .trim_end_matches(".git")
                .to_ascii_lowercase()
        };
        let wanted = norm(url);
        [Some(&self.clone_url), self.html_url.as_ref(), self.ssh_url.as_ref()]
            .into_iter()
            .flatten()
            .any(|candidate| norm(candidate) == wanted)
    }
}

#[derive(Debug, Deserialize)]
pub struct GitRef {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub base: GitRef,
    pub head: GitRef,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequest,
    pub repository: Repository,
}

#[derive(Debug, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub after: String,
    pub repository: Repository,
}

impl PushEvent {
    pub fn is_default_branch(&self) -> bool {
        let branch = self.repository.default_branch.as_deref().unwrap_or("main");
        self.git_ref == format!("refs/heads/{branch}")
    }
}
