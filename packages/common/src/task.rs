//! Messages delivered to competitor systems.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(
        rs_type = "String",
        db_type = "String(sea_orm::prelude::StringLen::None)"
    )
)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "full"))]
    Full,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "delta"))]
    Delta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Repo,
    FuzzTooling,
    Diff,
}

/// One downloadable source of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TaskSource {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub url: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TaskMetadata {
    pub task_id: Uuid,
    pub round_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TaskDetail {
    pub task_id: Uuid,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub deadline_ms: i64,
    pub project_name: String,
    pub focus: String,
    pub harnesses_included: bool,
    pub source: Vec<TaskSource>,
    pub metadata: TaskMetadata,
}

/// Body of `POST /v1/task/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TaskMessage {
    pub message_id: Uuid,
    pub message_time_ms: i64,
    pub tasks: Vec<TaskDetail>,
}

impl TaskMessage {
    pub fn new(tasks: Vec<TaskDetail>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            message_time_ms: chrono::Utc::now().timestamp_millis(),
            tasks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SarifBroadcastDetail {
    pub task_id: Uuid,
    pub sarif_id: Uuid,
    pub sarif: serde_json::Value,
    pub metadata: TaskMetadata,
}

/// Body of `POST /v1/sarif/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SarifBroadcastMessage {
    pub message_id: Uuid,
    pub message_time_ms: i64,
    pub broadcasts: Vec<SarifBroadcastDetail>,
}

impl SarifBroadcastMessage {
    pub fn new(broadcasts: Vec<SarifBroadcastDetail>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            message_time_ms: chrono::Utc::now().timestamp_millis(),
            broadcasts,
        }
    }
}
