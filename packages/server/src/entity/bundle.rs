use common::SubmissionStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Groups earlier submissions of one team on one task. At least two of the
/// optional fields are set in every committed row.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bundle")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub task_id: Uuid,
    #[sea_orm(belongs_to, from = "task_id", to = "id")]
    pub task: HasOne<super::task::Entity>,

    pub submitter_id: Uuid,
    pub status: SubmissionStatus,

    pub pov_id: Option<Uuid>,
    pub patch_id: Option<Uuid>,
    pub broadcast_sarif_id: Option<Uuid>,
    pub submitted_sarif_id: Option<Uuid>,
    pub freeform_id: Option<Uuid>,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
