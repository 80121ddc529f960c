use common::task::{SourceType, TaskType};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A source handed to competitors, stored as a JSON array on the task row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSource {
    pub kind: SourceType,
    pub content_hash: String,
}

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "task")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub task_type: TaskType,
    pub round_id: String,
    pub deadline: DateTimeUtc,
    pub project_name: String,
    pub focus: String,
    /// Head commit the task was cut at.
    pub commit: String,
    pub memory_gb: i32,
    pub cpus: i32,
    pub harnesses_included: bool,

    /// Stripped sources as delivered: `[{kind, content_hash}]`.
    #[sea_orm(column_type = "JsonBinary")]
    pub sources: serde_json::Value,

    /// Unstripped archives used by evaluation jobs.
    pub head_hash: String,
    pub fuzz_tooling_hash: String,
    pub base_hash: Option<String>,

    /// Team that requested an on-demand task; NULL for broadcast tasks.
    pub requested_by: Option<Uuid>,

    #[sea_orm(has_many)]
    pub pov_submissions: HasMany<super::pov_submission::Entity>,
    #[sea_orm(has_many)]
    pub patch_submissions: HasMany<super::patch_submission::Entity>,
    #[sea_orm(has_many)]
    pub sarif_submissions: HasMany<super::sarif_submission::Entity>,
    #[sea_orm(has_many)]
    pub freeform_submissions: HasMany<super::freeform_submission::Entity>,
    #[sea_orm(has_many)]
    pub bundles: HasMany<super::bundle::Entity>,
    #[sea_orm(has_one)]
    pub sarif_broadcast: HasOne<super::sarif_broadcast::Entity>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn stored_sources(&self) -> Result<Vec<StoredSource>, serde_json::Error> {
        serde_json::from_value(self.sources.clone())
    }

    /// Memory (GB) and CPU requests for evaluation jobs of this task.
    pub fn resources(&self) -> Result<(u32, u32), std::num::TryFromIntError> {
        Ok((u32::try_from(self.memory_gb)?, u32::try_from(self.cpus)?))
    }

    pub fn is_past_deadline(&self, now: DateTimeUtc) -> bool {
        past_deadline(self.deadline, now)
    }
}

/// Submissions landing exactly on the deadline are still on time.
pub fn past_deadline(deadline: DateTimeUtc, now: DateTimeUtc) -> bool {
    now > deadline
}
