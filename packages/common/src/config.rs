use serde::Deserialize;

/// App-level MQ configuration shared by server and worker.
#[derive(Debug, Deserialize, Clone)]
pub struct MqAppConfig {
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Connection pool size. Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Queue carrying evaluation results (worker publishes, server consumes).
    /// Default: "eval_results".
    #[serde(default = "default_mq_result_queue_name")]
    pub result_queue_name: String,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_mq_result_queue_name() -> String {
    "eval_results".into()
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            result_queue_name: default_mq_result_queue_name(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    #[default]
    Filesystem,
}

/// Content store configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Bucket name (s3 backend).
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for MinIO or other S3-compatible stores.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub path_style: bool,
    /// Object directory (filesystem backend).
    #[serde(default = "default_root")]
    pub root: String,
}

fn default_bucket() -> String {
    "gauntlet-archive".into()
}
fn default_region() -> String {
    "us-east-1".into()
}
fn default_root() -> String {
    "./data/objects".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: default_bucket(),
            region: default_region(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            path_style: false,
            root: default_root(),
        }
    }
}

/// Config file path, overridable with `GAUNTLET_CONFIG`.
pub fn config_path() -> String {
    std::env::var("GAUNTLET_CONFIG").unwrap_or_else(|_| "config/config".to_string())
}
