use common::eval::{EntityType, ResultContext};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "eval_command_result")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub result_context: ResultContext,

    /// argv as a JSON array of strings.
    #[sea_orm(column_type = "JsonBinary")]
    pub argv: serde_json::Value,
    pub stdout_object: String,
    pub stderr_object: String,
    pub exit_code: i32,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
