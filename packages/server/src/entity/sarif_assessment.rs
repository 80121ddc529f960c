use common::SubmissionStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, DeriveActiveEnum, EnumIter, Serialize, Deserialize,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum Assessment {
    #[sea_orm(string_value = "correct")]
    Correct,
    #[sea_orm(string_value = "incorrect")]
    Incorrect,
}

impl Assessment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
        }
    }
}

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sarif_assessment")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub task_id: Uuid,
    pub submitter_id: Uuid,
    pub status: SubmissionStatus,

    pub sarif_broadcast_id: Uuid,
    #[sea_orm(belongs_to, from = "sarif_broadcast_id", to = "id")]
    pub sarif_broadcast: HasOne<super::sarif_broadcast::Entity>,

    pub assessment: Assessment,
    pub description: String,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
