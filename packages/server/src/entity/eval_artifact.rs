use common::eval::{EntityType, ResultContext};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A file produced while evaluating a POV, patch, or job.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "eval_artifact")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub result_context: ResultContext,

    pub filename: String,
    pub object_name: String,
    pub archived_file_kind: String,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
