use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use common::SubmissionStatus;
use common::eval::{EntityType, EvalEntity};
use common::storage::{BlobSource, ContentHash, hashed};
use sea_orm::sea_query::LockType;
use sea_orm::*;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::{EVAL_URL_TTL, presign};
use crate::dispatch::{EvalJob, PovTarget};
use crate::entity::{eval_artifact, eval_command_result, job};
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::{AuthUser, Permission};
use crate::extractors::json::AppJson;
use crate::models::job::{BulkJobRequest, BulkJobResponse, JobArgs, JobResponse};
use crate::models::shared::{
    MAX_BLOB_BYTES, MAX_PATCH_BYTES, decode_base64_field, validate_bulk_len,
};
use crate::state::AppState;

pub const MAX_BULK_JOBS: usize = 100;
const DEFAULT_MEMORY_GB: u32 = 8;
const DEFAULT_CPUS: u32 = 4;

/// Inputs of a job after blobs are uploaded.
struct Prepared {
    args: JobArgs,
    cache_key: String,
    testcase_hash: Option<String>,
    patch_hash: Option<String>,
}

fn check_hash(field: &str, value: &str) -> Result<(), AppError> {
    ContentHash::from_hex(value)
        .map(|_| ())
        .map_err(|e| AppError::field(field, e.to_string()))
}

async fn prepare(state: &AppState, args: JobArgs) -> Result<Prepared, AppError> {
    check_hash("head_repo_hash", &args.head_repo_hash)?;
    check_hash("fuzz_tooling_hash", &args.fuzz_tooling_hash)?;
    if let Some(base) = &args.base_repo_hash {
        check_hash("base_repo_hash", base)?;
    }

    let testcase_hash = match &args.pov {
        Some(pov) => {
            let bytes = decode_base64_field("pov.testcase", &pov.testcase, MAX_BLOB_BYTES)?;
            let hash = hashed(state.store.as_ref(), &BlobSource::bytes(bytes)).await?;
            Some(hash.to_hex())
        }
        None => None,
    };
    let patch_hash = match &args.patch {
        Some(patch) => {
            let bytes = decode_base64_field("patch", patch, MAX_PATCH_BYTES)?;
            let hash = hashed(state.store.as_ref(), &BlobSource::bytes(bytes)).await?;
            Some(hash.to_hex())
        }
        None => None,
    };

    let mut cache_key = args.cache_key(
        &state.config.competition.global_cache_key,
        testcase_hash.as_deref(),
        patch_hash.as_deref(),
    );
    if args.fresh {
        cache_key = format!("{cache_key}:{}", Uuid::new_v4().simple());
    }

    Ok(Prepared {
        args,
        cache_key,
        testcase_hash,
        patch_hash,
    })
}

/// Return the job for `cache_key`, creating it if absent. The flag is true
/// when the caller must start an evaluation for the row.
///
/// An `errored` job says nothing about its inputs, so a hit on one is reset
/// to `accepted`, its recorded output dropped, and run again under the same
/// id. Every other status is served from cache.
async fn lookup_or_create(
    db: &DatabaseConnection,
    cache_key: &str,
    skip_patch_tests: bool,
) -> Result<(job::Model, bool), DbErr> {
    let txn = db.begin().await?;
    let existing = job::Entity::find()
        .filter(job::Column::CacheKey.eq(cache_key))
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    if let Some(found) = existing {
        if found.status != SubmissionStatus::Errored {
            txn.commit().await?;
            return Ok((found, false));
        }
        eval_command_result::Entity::delete_many()
            .filter(eval_command_result::Column::EntityType.eq(EntityType::Job))
            .filter(eval_command_result::Column::EntityId.eq(found.id))
            .exec(&txn)
            .await?;
        eval_artifact::Entity::delete_many()
            .filter(eval_artifact::Column::EntityType.eq(EntityType::Job))
            .filter(eval_artifact::Column::EntityId.eq(found.id))
            .exec(&txn)
            .await?;
        let mut retry: job::ActiveModel = found.into();
        retry.status = Set(SubmissionStatus::Accepted);
        retry.functionality_tests_passing = Set(None);
        retry.skip_patch_tests = Set(skip_patch_tests);
        retry.updated_at = Set(Utc::now());
        let retried = retry.update(&txn).await?;
        txn.commit().await?;
        return Ok((retried, true));
    }

    let now = Utc::now();
    let inserted = job::ActiveModel {
        id: Set(Uuid::now_v7()),
        cache_key: Set(cache_key.to_string()),
        status: Set(SubmissionStatus::Accepted),
        functionality_tests_passing: Set(None),
        skip_patch_tests: Set(skip_patch_tests),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await;

    match inserted {
        Ok(created) => {
            txn.commit().await?;
            Ok((created, true))
        }
        // Lost the race against a concurrent insert of the same key.
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            txn.rollback().await?;
            let found = job::Entity::find()
                .filter(job::Column::CacheKey.eq(cache_key))
                .one(db)
                .await?
                .ok_or_else(|| {
                    DbErr::Custom("UniqueConstraintViolation but existing job not found".into())
                })?;
            Ok((found, false))
        }
        Err(e) => Err(e),
    }
}

async fn start(state: &AppState, job: &job::Model, prepared: &Prepared) -> Result<(), AppError> {
    let args = &prepared.args;
    let head = presign(state, &args.head_repo_hash, EVAL_URL_TTL).await?;
    let fuzz = presign(state, &args.fuzz_tooling_hash, EVAL_URL_TTL).await?;
    let base = match &args.base_repo_hash {
        Some(base) => Some(presign(state, base, EVAL_URL_TTL).await?),
        None => None,
    };
    let pov = match (&args.pov, &prepared.testcase_hash) {
        (Some(pov), Some(hash)) => Some(PovTarget {
            trigger_url: presign(state, hash, EVAL_URL_TTL).await?,
            harness: pov.harness.clone(),
            sanitizer: pov.sanitizer.clone(),
            engine: pov.engine.clone(),
            architecture: pov.architecture.clone(),
        }),
        _ => None,
    };
    let patch_url = match &prepared.patch_hash {
        Some(hash) => Some(presign(state, hash, EVAL_URL_TTL).await?),
        None => None,
    };

    state
        .dispatcher
        .eval(EvalJob {
            entity: EvalEntity {
                entity_type: EntityType::Job,
                entity_id: job.id,
            },
            round_id: state.config.competition.current_round_id.clone(),
            task_id: None,
            team_id: None,
            head_repo_url: head,
            base_repo_url: base,
            fuzz_tooling_url: fuzz,
            focus: args.focus.clone(),
            project_name: args.project_name.clone(),
            memory_gb: args.memory_gb.unwrap_or(DEFAULT_MEMORY_GB),
            cpus: args.cpus.unwrap_or(DEFAULT_CPUS),
            pov,
            patch_url,
            skip_patch_tests: args.skip_patch_tests,
        })
        .await?;
    Ok(())
}

async fn load(state: &AppState, job: job::Model) -> Result<JobResponse, AppError> {
    let artifacts = eval_artifact::Entity::find()
        .filter(eval_artifact::Column::EntityType.eq(EntityType::Job))
        .filter(eval_artifact::Column::EntityId.eq(job.id))
        .order_by_asc(eval_artifact::Column::CreatedAt)
        .all(&state.db)
        .await?;
    let results = eval_command_result::Entity::find()
        .filter(eval_command_result::Column::EntityType.eq(EntityType::Job))
        .filter(eval_command_result::Column::EntityId.eq(job.id))
        .order_by_asc(eval_command_result::Column::CreatedAt)
        .all(&state.db)
        .await?;
    Ok(JobResponse::new(job, artifacts, results))
}

/// Find or create the job for `prepared`, dispatching an evaluation when new.
async fn run_job(state: &AppState, prepared: Prepared) -> Result<JobResponse, AppError> {
    let (row, created) = lookup_or_create(
        &state.db,
        &prepared.cache_key,
        prepared.args.skip_patch_tests,
    )
    .await?;

    if !created {
        info!(job_id = %row.id, "job served from cache");
        return load(state, row).await;
    }

    if let Err(e) = start(state, &row, &prepared).await {
        error!(job_id = %row.id, error = ?e, "failed to start evaluation");
        let mut failed: job::ActiveModel = row.into();
        failed.status = Set(SubmissionStatus::Errored);
        failed.updated_at = Set(Utc::now());
        failed.update(&state.db).await?;
        return Err(e);
    }
    info!(job_id = %row.id, "job started");
    Ok(JobResponse::new(row, Vec::new(), Vec::new()))
}

#[utoipa::path(
    post,
    path = "/jobrunner/job/",
    tag = "Job Runner",
    operation_id = "createJob",
    summary = "Run or look up an evaluation job",
    description = "Evaluates sources already in the content store. A job with identical inputs is returned instead of starting a new one unless `fresh` is set. Requires the `job_runner` permission.",
    request_body = JobArgs,
    responses(
        (status = 200, description = "Job", body = JobResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 429, description = "Rate limited (RATE_LIMITED)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(principal = %auth_user.id, project = %payload.project_name))]
pub async fn create_job(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<JobArgs>,
) -> Result<Json<JobResponse>, AppError> {
    auth_user.require(&[Permission::JobRunner])?;
    state.rate_limiter.check("job", &auth_user.id.to_string()).await?;

    let prepared = prepare(&state, payload).await?;
    Ok(Json(run_job(&state, prepared).await?))
}

#[utoipa::path(
    post,
    path = "/jobrunner/job/bulk/",
    tag = "Job Runner",
    operation_id = "createJobsBulk",
    summary = "Run or look up several evaluation jobs",
    description = "Accepts between 1 and 100 jobs. Every job is validated before any is created. Results are returned in request order.",
    request_body = BulkJobRequest,
    responses(
        (status = 200, description = "Jobs", body = BulkJobResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 429, description = "Rate limited (RATE_LIMITED)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(principal = %auth_user.id, count = payload.jobs.len()))]
pub async fn create_jobs_bulk(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<BulkJobRequest>,
) -> Result<Json<BulkJobResponse>, AppError> {
    auth_user.require(&[Permission::JobRunner])?;
    validate_bulk_len(payload.jobs.len(), "jobs", MAX_BULK_JOBS)?;
    state.rate_limiter.check("job", &auth_user.id.to_string()).await?;

    let mut prepared = Vec::with_capacity(payload.jobs.len());
    for args in payload.jobs {
        prepared.push(prepare(&state, args).await?);
    }
    let mut jobs = Vec::with_capacity(prepared.len());
    for p in prepared {
        jobs.push(run_job(&state, p).await?);
    }
    Ok(Json(BulkJobResponse { jobs }))
}

#[utoipa::path(
    get,
    path = "/jobrunner/job/{job_id}/",
    tag = "Job Runner",
    operation_id = "getJob",
    summary = "Get a job with its artifacts and command results",
    params(("job_id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job", body = JobResponse),
        (status = 401, description = "Unauthorized (UNAUTHORIZED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Job not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("basic" = [])),
)]
#[instrument(skip(state, auth_user), fields(%job_id))]
pub async fn get_job(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>, AppError> {
    auth_user.require(&[Permission::JobRunner])?;
    let row = job::Entity::find_by_id(job_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".into()))?;
    Ok(Json(load(&state, row).await?))
}
