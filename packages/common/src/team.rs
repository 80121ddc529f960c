use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Environment variable carrying encoded delivery targets to the worker.
pub const CREDENTIALS_ENV: &str = "CRS_API_CREDENTIALS";

/// A competitor endpoint the platform pushes tasks to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTarget {
    pub team_id: Uuid,
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTarget")
            .field("team_id", &self.team_id)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("credentials are not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("credentials are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn encode_targets(targets: &[DeliveryTarget]) -> Result<String, CredentialsError> {
    Ok(STANDARD.encode(serde_json::to_vec(targets)?))
}

pub fn decode_targets(encoded: &str) -> Result<Vec<DeliveryTarget>, CredentialsError> {
    let raw = STANDARD.decode(encoded.trim())?;
    Ok(serde_json::from_slice(&raw)?)
}
