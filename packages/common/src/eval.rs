use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::ArchivedFileKind;
use crate::submission_status::SubmissionStatus;

/// What kind of row an evaluation reports on.
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
pub enum EntityType {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "job"))]
    Job,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "pov"))]
    Pov,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "patch"))]
    Patch,
}

/// Which side of a delta scan a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(
        rs_type = "String",
        db_type = "String(sea_orm::prelude::StringLen::None)"
    )
)]
#[serde(rename_all = "snake_case")]
pub enum ResultContext {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "head_repo_test"))]
    HeadRepoTest,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "base_repo_test"))]
    BaseRepoTest,
}

impl ResultContext {
    pub fn fuzz_out_kind(self) -> ArchivedFileKind {
        match self {
            Self::HeadRepoTest => ArchivedFileKind::FuzzOutHead,
            Self::BaseRepoTest => ArchivedFileKind::FuzzOutBase,
        }
    }
}

/// Reference to an object already uploaded to the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BlobRef {
    pub object_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub result_context: ResultContext,
    pub filename: String,
    pub blob: BlobRef,
    pub archived_file_kind: ArchivedFileKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub argv: Vec<String>,
    pub stdout_blob: BlobRef,
    pub stderr_blob: BlobRef,
    pub exit_code: i32,
    pub result_context: ResultContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Final {
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_tests_failed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum EvalPayload {
    Artifact(Artifact),
    CommandResult(CommandResult),
    Final(Final),
}

impl EvalPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Artifact(_) => "artifact",
            Self::CommandResult(_) => "command_result",
            Self::Final(_) => "final",
        }
    }
}

/// One message on the result queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalMessage {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    #[serde(flatten)]
    pub payload: EvalPayload,
}

/// The row an evaluation reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalEntity {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
}

impl EvalEntity {
    pub fn message(&self, payload: EvalPayload) -> EvalMessage {
        EvalMessage {
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            payload,
        }
    }
}
