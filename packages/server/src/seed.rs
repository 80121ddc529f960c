use chrono::Utc;
use sea_orm::sea_query::{Index, IndexCreateStatement, OnConflict, PostgresQueryBuilder};
use sea_orm::*;
use tracing::{info, warn};

use crate::config::BootstrapCredential;
use crate::entity::{auth, bundle, eval_artifact, eval_command_result, patch_submission, pov_submission};
use crate::utils::hash;

/// Create every configured credential that does not exist yet. Existing rows
/// keep their token and permissions.
pub async fn seed_auth(
    db: &DatabaseConnection,
    credentials: &[BootstrapCredential],
) -> Result<(), DbErr> {
    let mut inserted = 0u32;
    for cred in credentials {
        let token = cred.token.clone();
        let token_hash = tokio::task::spawn_blocking(move || hash::hash_token(&token))
            .await
            .map_err(|e| DbErr::Custom(format!("hashing task failed: {e}")))?
            .map_err(|e| DbErr::Custom(format!("failed to hash bootstrap token: {e}")))?;

        let now = Utc::now();
        let model = auth::ActiveModel {
            id: Set(cred.id),
            token_hash: Set(token_hash),
            note: Set(cred.note.clone()),
            active: Set(true),
            crs: Set(cred.permissions.crs),
            competition_management: Set(cred.permissions.competition_management),
            job_runner: Set(cred.permissions.job_runner),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let result = auth::Entity::insert(model)
            .on_conflict(OnConflict::column(auth::Column::Id).do_nothing().to_owned())
            .exec_without_returning(db)
            .await;

        match result {
            Ok(n) if n > 0 => inserted += 1,
            Ok(_) | Err(DbErr::RecordNotInserted) => {}
            Err(e) => return Err(e),
        }
    }

    info!(
        inserted,
        configured = credentials.len(),
        "Seeded bootstrap credentials"
    );
    Ok(())
}

fn indexes() -> Vec<(&'static str, IndexCreateStatement)> {
    vec![
        // Ownership filters on status lookups and bundle checks.
        (
            "idx_pov_task_submitter",
            Index::create()
                .if_not_exists()
                .name("idx_pov_task_submitter")
                .table(pov_submission::Entity)
                .col(pov_submission::Column::TaskId)
                .col(pov_submission::Column::SubmitterId)
                .to_owned(),
        ),
        (
            "idx_patch_task_submitter",
            Index::create()
                .if_not_exists()
                .name("idx_patch_task_submitter")
                .table(patch_submission::Entity)
                .col(patch_submission::Column::TaskId)
                .col(patch_submission::Column::SubmitterId)
                .to_owned(),
        ),
        (
            "idx_bundle_task_submitter",
            Index::create()
                .if_not_exists()
                .name("idx_bundle_task_submitter")
                .table(bundle::Entity)
                .col(bundle::Column::TaskId)
                .col(bundle::Column::SubmitterId)
                .to_owned(),
        ),
        // Evaluation output is always read per entity.
        (
            "idx_eval_artifact_entity",
            Index::create()
                .if_not_exists()
                .name("idx_eval_artifact_entity")
                .table(eval_artifact::Entity)
                .col(eval_artifact::Column::EntityType)
                .col(eval_artifact::Column::EntityId)
                .to_owned(),
        ),
        (
            "idx_eval_command_result_entity",
            Index::create()
                .if_not_exists()
                .name("idx_eval_command_result_entity")
                .table(eval_command_result::Entity)
                .col(eval_command_result::Column::EntityType)
                .col(eval_command_result::Column::EntityId)
                .to_owned(),
        ),
    ]
}

/// Ensure composite indexes exist.
///
/// Schema sync only creates single-column unique indexes, so the composite
/// ones are created here on startup. A failure is logged and skipped.
pub async fn ensure_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    for (name, index) in indexes() {
        let stmt = index.to_string(PostgresQueryBuilder);
        match db.execute_unprepared(&stmt).await {
            Ok(_) => info!(index = %name, "Ensured index exists"),
            Err(e) => warn!(index = %name, error = %e, "Failed to create index"),
        }
    }
    Ok(())
}
