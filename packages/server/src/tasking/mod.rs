//! Cut challenge tasks out of a repository and hand them to the teams.

pub mod git;
pub mod tarball;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::audit::{ArchivedFileKind, AuditEvent, AuditLogger, AuditScope, FileArchivedEvent, ScanEvent};
use common::challenge::{ChallengeDescriptor, DescriptorError};
use common::storage::{BlobSource, ContentHash, ContentStore, StorageError, hashed};
use common::task::{SourceType, TaskDetail, TaskMessage, TaskMetadata, TaskSource, TaskType};
use common::team::DeliveryTarget;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, Set, TransactionTrait};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::TaskingConfig;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::entity::task::{self, StoredSource};
use git::Git;

pub const TASK_ROUTE: &str = "/v1/task/";
/// Presigned URLs outlive the deadline by this much.
const URL_GRACE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum TaskingError {
    #[error("git {args} exited with {code}: {stderr}")]
    Git {
        args: String,
        code: i32,
        stderr: String,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("database error: {0}")]
    Db(#[from] DbErr),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("failed to encode sources: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("challenge resources out of range: {0}")]
    Resources(#[from] std::num::TryFromIntError),
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub repo_url: String,
    pub head_ref: String,
    /// Set for delta scans.
    pub base_ref: Option<String>,
    pub deadline: DateTime<Utc>,
    pub round_id: String,
    pub targets: Vec<DeliveryTarget>,
    pub requested_by: Option<Uuid>,
}

impl ScanRequest {
    pub fn task_type(&self) -> TaskType {
        if self.base_ref.is_some() {
            TaskType::Delta
        } else {
            TaskType::Full
        }
    }
}

/// A tarball ready for upload.
struct Packed {
    path: PathBuf,
    kind: ArchivedFileKind,
}

struct Uploaded {
    hash: ContentHash,
    kind: ArchivedFileKind,
    filename: String,
}

pub struct TaskingEngine {
    db: DatabaseConnection,
    store: Arc<dyn ContentStore>,
    audit: Arc<AuditLogger>,
    dispatcher: Arc<Dispatcher>,
    git: Git,
    config: TaskingConfig,
}

impl TaskingEngine {
    pub fn new(
        db: DatabaseConnection,
        store: Arc<dyn ContentStore>,
        audit: Arc<AuditLogger>,
        dispatcher: Arc<Dispatcher>,
        config: TaskingConfig,
    ) -> Self {
        Self {
            db,
            store,
            audit,
            dispatcher,
            git: Git::new(config.git_token.clone()),
            config,
        }
    }

    async fn strip(&self, dir: &Path) -> Result<(), TaskingError> {
        for rel in &self.config.strip_paths {
            let path = dir.join(rel);
            match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await?,
                Ok(_) => tokio::fs::remove_file(&path).await?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn upload(&self, packed: Packed) -> Result<Uploaded, TaskingError> {
        let filename = packed
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let hash = hashed(self.store.as_ref(), &BlobSource::Path(packed.path)).await?;
        Ok(Uploaded {
            hash,
            kind: packed.kind,
            filename,
        })
    }

    /// Run a full or delta scan and deliver the resulting task.
    ///
    /// The scratch directory is removed on every exit path. The task row is
    /// committed, and the scan audited, only once the delivery job has been
    /// accepted.
    #[instrument(skip(self, req), fields(repo = %req.repo_url, head = %req.head_ref, base = ?req.base_ref))]
    pub async fn scan(&self, req: ScanRequest) -> Result<task::Model, TaskingError> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("gauntlet-scan-")
            .tempdir_in(&self.config.work_dir)?;
        let root = scratch.path();
        let focus = git::repo_name(&req.repo_url);

        let head_dir = root.join("heads").join(&focus);
        self.git.clone(&req.repo_url, &head_dir).await?;
        let base_dir = root.join("baseRepos").join(&focus);
        if req.base_ref.is_some() {
            let (src, dest) = (head_dir.clone(), base_dir.clone());
            tokio::task::spawn_blocking(move || tarball::copy_tree(&src, &dest))
                .await
                .map_err(std::io::Error::other)??;
        }

        self.git.checkout(&head_dir, &req.head_ref).await?;
        let commit = self.git.rev_parse(&head_dir, "HEAD").await?;
        if let Some(base_ref) = &req.base_ref {
            self.git.checkout(&base_dir, base_ref).await?;
        }

        let descriptor = ChallengeDescriptor::load(&head_dir).await?;

        // Unstripped archives, used only by evaluation jobs.
        let archives = root.join("archives");
        tokio::fs::create_dir_all(&archives).await?;
        self.git.scrub_origin(&head_dir, &req.repo_url).await?;
        let unstripped_head = tarball::pack_tree(
            head_dir.clone(),
            focus.clone(),
            archives.join("head-unstripped.tar.gz"),
        );
        let unstripped_base = async {
            if req.base_ref.is_none() {
                return Ok(None);
            }
            self.git.scrub_origin(&base_dir, &req.repo_url).await?;
            let path = tarball::pack_tree(
                base_dir.clone(),
                focus.clone(),
                archives.join("base-unstripped.tar.gz"),
            )
            .await?;
            Ok::<_, TaskingError>(Some(path))
        };
        let (unstripped_head, unstripped_base) = tokio::try_join!(
            async { unstripped_head.await.map_err(TaskingError::from) },
            unstripped_base
        )?;

        let diff_dir = root.join("diff");
        if let Some(base_ref) = &req.base_ref {
            let diff = self
                .git
                .diff(&head_dir, base_ref, &req.head_ref, &self.config.strip_paths)
                .await?;
            tokio::fs::create_dir_all(&diff_dir).await?;
            tokio::fs::write(diff_dir.join("ref.diff"), diff).await?;
        }

        let fuzz_dir = root.join("fuzz-tooling");
        self.git
            .clone(&descriptor.fuzz_tooling_url, &fuzz_dir)
            .await?;
        self.git
            .checkout(&fuzz_dir, &descriptor.fuzz_tooling_ref)
            .await?;

        // Competitors get the repo without platform metadata.
        let repo_dir = if req.base_ref.is_some() {
            &base_dir
        } else {
            &head_dir
        };
        self.strip(repo_dir).await?;
        self.strip(&fuzz_dir).await?;

        let stripped_repo = tarball::pack_tree(
            repo_dir.clone(),
            focus.clone(),
            archives.join("repo.tar.gz"),
        );
        let fuzz_tooling = tarball::pack_tree(
            fuzz_dir.clone(),
            "fuzz-tooling".into(),
            archives.join("fuzz-tooling.tar.gz"),
        );
        let diff = async {
            if req.base_ref.is_none() {
                return Ok(None);
            }
            tarball::pack_tree(diff_dir.clone(), "diff".into(), archives.join("diff.tar.gz"))
                .await
                .map(Some)
        };
        let (stripped_repo, fuzz_tooling, diff) = tokio::try_join!(stripped_repo, fuzz_tooling, diff)?;

        let head = self
            .upload(Packed {
                path: unstripped_head,
                kind: ArchivedFileKind::UnstrippedHeadTarball,
            })
            .await?;
        let base = match unstripped_base {
            Some(path) => Some(
                self.upload(Packed {
                    path,
                    kind: ArchivedFileKind::UnstrippedBaseTarball,
                })
                .await?,
            ),
            None => None,
        };
        let repo = self
            .upload(Packed {
                path: stripped_repo,
                kind: ArchivedFileKind::StrippedBaseTarball,
            })
            .await?;
        let fuzz = self
            .upload(Packed {
                path: fuzz_tooling,
                kind: ArchivedFileKind::FuzzToolingTarball,
            })
            .await?;
        let diff = match diff {
            Some(path) => Some(
                self.upload(Packed {
                    path,
                    kind: ArchivedFileKind::DiffTarball,
                })
                .await?,
            ),
            None => None,
        };

        let mut sources = vec![
            (SourceType::Repo, &repo),
            (SourceType::FuzzTooling, &fuzz),
        ];
        if let Some(diff) = &diff {
            sources.push((SourceType::Diff, diff));
        }
        let stored: Vec<StoredSource> = sources
            .iter()
            .map(|(kind, up)| StoredSource {
                kind: *kind,
                content_hash: up.hash.to_hex(),
            })
            .collect();

        let now = Utc::now();
        let task_type = req.task_type();
        let txn = self.db.begin().await?;
        let row = task::ActiveModel {
            id: Set(Uuid::now_v7()),
            task_type: Set(task_type),
            round_id: Set(req.round_id.clone()),
            deadline: Set(req.deadline),
            project_name: Set(descriptor.project_name.clone()),
            focus: Set(focus.clone()),
            commit: Set(commit),
            memory_gb: Set(i32::try_from(descriptor.memory_gb)?),
            cpus: Set(i32::try_from(descriptor.cpus)?),
            harnesses_included: Set(descriptor.harnesses_included),
            sources: Set(serde_json::to_value(&stored)?),
            head_hash: Set(head.hash.to_hex()),
            fuzz_tooling_hash: Set(fuzz.hash.to_hex()),
            base_hash: Set(base.as_ref().map(|b| b.hash.to_hex())),
            requested_by: Set(req.requested_by),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let message = self.task_message(&row, &sources, now).await?;
        self.dispatcher
            .broadcast(
                TASK_ROUTE,
                &req.round_id,
                Some(row.id),
                &message,
                req.deadline,
                &req.targets,
            )
            .await?;
        txn.commit().await?;
        info!(task_id = %row.id, ?task_type, "task created");

        let scope = AuditScope::task(row.id).round(&req.round_id);
        let scan_event = ScanEvent {
            project_name: row.project_name.clone(),
            focus: focus.clone(),
            repo_url: git::https_url(&req.repo_url),
            head_ref: req.head_ref.clone(),
            base_ref: req.base_ref.clone(),
            deadline_ms: req.deadline.timestamp_millis(),
            harnesses_included: row.harnesses_included,
        };
        self.audit.emit(
            &scope,
            match task_type {
                TaskType::Delta => AuditEvent::NewDeltaScan(scan_event),
                TaskType::Full => AuditEvent::NewFullScan(scan_event),
            },
        );
        for up in [Some(&head), base.as_ref(), Some(&repo), Some(&fuzz), diff.as_ref()]
            .into_iter()
            .flatten()
        {
            self.audit.emit(
                &scope,
                AuditEvent::FileArchived(FileArchivedEvent {
                    kind: up.kind,
                    object_name: up.hash.to_hex(),
                    store: self.store.store_identifier(),
                    filename: Some(up.filename.clone()),
                    submission_id: None,
                }),
            );
        }

        Ok(row)
    }

    async fn task_message(
        &self,
        row: &task::Model,
        sources: &[(SourceType, &Uploaded)],
        now: DateTime<Utc>,
    ) -> Result<TaskMessage, TaskingError> {
        let ttl = (row.deadline - now).to_std().unwrap_or_default() + URL_GRACE;
        let mut source = Vec::with_capacity(sources.len());
        for (kind, up) in sources {
            source.push(TaskSource {
                source_type: *kind,
                url: self.store.presigned_read(&up.hash, ttl).await?,
                sha256: up.hash.to_hex(),
            });
        }
        Ok(TaskMessage::new(vec![TaskDetail {
            task_id: row.id,
            task_type: row.task_type,
            deadline_ms: row.deadline.timestamp_millis(),
            project_name: row.project_name.clone(),
            focus: row.focus.clone(),
            harnesses_included: row.harnesses_included,
            source,
            metadata: TaskMetadata {
                task_id: row.id,
                round_id: row.round_id.clone(),
            },
        }]))
    }
}
