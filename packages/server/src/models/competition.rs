use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, utoipa::ToSchema)]
pub struct PingResponse {
    #[schema(example = "ready")]
    pub status: &'static str,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct OutOfBudgetRequest {
    #[schema(example = "team-a")]
    pub competitor_id: String,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct SarifBroadcastRequest {
    #[schema(value_type = Object)]
    pub sarif: serde_json::Value,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct SarifBroadcastResponse {
    pub sarif_id: Uuid,
    pub task_id: Uuid,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ChallengeListResponse {
    pub challenges: Vec<String>,
}

#[derive(Deserialize, utoipa::ToSchema, Default)]
pub struct ChallengeRequest {
    /// Task lifetime. Defaults to one hour.
    #[serde(default)]
    #[schema(example = 3600)]
    pub duration_secs: Option<u64>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ScheduledResponse {
    #[schema(example = "scheduled")]
    pub status: &'static str,
}
