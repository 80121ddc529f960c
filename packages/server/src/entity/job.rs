use common::SubmissionStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An evaluation requested through the job runner API.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Hex SHA-256 over the job inputs. Fresh jobs get a random suffix mixed
    /// in so they never collide with cached ones.
    #[sea_orm(unique)]
    pub cache_key: String,
    pub status: SubmissionStatus,
    pub functionality_tests_passing: Option<bool>,
    pub skip_patch_tests: bool,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
