//! Challenge and fuzz-tooling project descriptors.

use std::path::Path;

use serde::Deserialize;

/// Relative location of the challenge descriptor inside a target repo.
pub const CHALLENGE_DESCRIPTOR: &str = ".aixcc/challenge.yaml";

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Harness {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// `.aixcc/challenge.yaml`
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeDescriptor {
    pub fuzz_tooling_url: String,
    pub fuzz_tooling_ref: String,
    /// Project name inside the fuzz tooling's `projects/` directory.
    #[serde(alias = "fuzz_tooling_project_name")]
    pub project_name: String,
    #[serde(default = "default_memory_gb")]
    pub memory_gb: u32,
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    #[serde(default = "default_true")]
    pub harnesses_included: bool,
    #[serde(default)]
    pub harnesses_list: Vec<Harness>,
}

fn default_memory_gb() -> u32 {
    8
}
fn default_cpus() -> u32 {
    4
}
fn default_true() -> bool {
    true
}

impl ChallengeDescriptor {
    /// Load the descriptor from a checked-out repository root.
    pub async fn load(repo_dir: &Path) -> Result<Self, DescriptorError> {
        read_yaml(&repo_dir.join(CHALLENGE_DESCRIPTOR)).await
    }

    pub fn has_harness(&self, name: &str) -> bool {
        self.harnesses_list.iter().any(|h| h.name == name)
    }
}

/// `<fuzz_tooling>/projects/<project>/project.yaml`
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectDescriptor {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_sanitizers")]
    pub sanitizers: Vec<String>,
    #[serde(default)]
    pub main_repo: Option<String>,
}

fn default_language() -> String {
    "c".into()
}
fn default_sanitizers() -> Vec<String> {
    vec!["address".into(), "undefined".into()]
}

impl ProjectDescriptor {
    pub async fn load(fuzz_tooling_dir: &Path, project: &str) -> Result<Self, DescriptorError> {
        read_yaml(
            &fuzz_tooling_dir
                .join("projects")
                .join(project)
                .join("project.yaml"),
        )
        .await
    }

    pub fn is_jvm(&self) -> bool {
        self.language == "jvm"
    }
}

async fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DescriptorError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DescriptorError::Read {
            path: path.display().to_string(),
            source,
        })?;
    serde_yaml::from_str(&raw).map_err(|source| DescriptorError::Parse {
        path: path.display().to_string(),
        source,
    })
}
