use std::path::Path;
use std::sync::Arc;

use common::audit::{ArchivedFileKind, AuditEvent, AuditLogger, AuditScope, FileArchivedEvent};
use common::eval::{Artifact, BlobRef, CommandResult, EvalEntity, EvalPayload, ResultContext};
use common::storage::{BlobSource, ContentHash, ContentStore, hashed};
use mq::ResultQueue;

use super::error::EvalError;
use super::runner::{CommandOutput, CommandSpec};

/// Archives engine output to the content store and reports it on the result
/// queue.
#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn ContentStore>,
    queue: Arc<dyn ResultQueue>,
    audit: Arc<AuditLogger>,
    scope: AuditScope,
    entity: EvalEntity,
}

impl Recorder {
    pub fn new(
        store: Arc<dyn ContentStore>,
        queue: Arc<dyn ResultQueue>,
        audit: Arc<AuditLogger>,
        scope: AuditScope,
        entity: EvalEntity,
    ) -> Self {
        Self {
            store,
            queue,
            audit,
            scope,
            entity,
        }
    }

    pub fn entity(&self) -> EvalEntity {
        self.entity
    }

    pub fn queue(&self) -> &Arc<dyn ResultQueue> {
        &self.queue
    }

    async fn archive(
        &self,
        source: &BlobSource,
        kind: ArchivedFileKind,
        filename: &str,
    ) -> Result<ContentHash, EvalError> {
        let key = hashed(self.store.as_ref(), source).await?;
        self.audit.emit(
            &self.scope,
            AuditEvent::FileArchived(FileArchivedEvent {
                kind,
                object_name: key.to_hex(),
                store: self.store.store_identifier(),
                filename: Some(filename.to_string()),
                submission_id: Some(self.entity.entity_id),
            }),
        );
        Ok(key)
    }

    /// Archive a command's stdout and stderr and enqueue a `command_result`.
    pub async fn command_result(
        &self,
        spec: &CommandSpec,
        output: &CommandOutput,
        context: ResultContext,
    ) -> Result<(), EvalError> {
        let stdout = self
            .archive(
                &BlobSource::bytes(output.stdout.clone()),
                ArchivedFileKind::CommandStdout,
                "stdout",
            )
            .await?;
        let stderr = self
            .archive(
                &BlobSource::bytes(output.stderr.clone()),
                ArchivedFileKind::CommandStderr,
                "stderr",
            )
            .await?;
        self.queue
            .publish(&self.entity.message(EvalPayload::CommandResult(CommandResult {
                argv: spec.argv(),
                stdout_blob: BlobRef {
                    object_name: stdout.to_hex(),
                },
                stderr_blob: BlobRef {
                    object_name: stderr.to_hex(),
                },
                exit_code: output.exit_code,
                result_context: context,
            })))
            .await?;
        Ok(())
    }

    /// Archive a file produced by the engine and enqueue an `artifact`.
    pub async fn artifact(
        &self,
        path: &Path,
        kind: ArchivedFileKind,
        context: ResultContext,
    ) -> Result<(), EvalError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = self
            .archive(&BlobSource::Path(path.to_path_buf()), kind, &filename)
            .await?;
        self.queue
            .publish(&self.entity.message(EvalPayload::Artifact(Artifact {
                result_context: context,
                filename,
                blob: BlobRef {
                    object_name: key.to_hex(),
                },
                archived_file_kind: kind,
            })))
            .await?;
        Ok(())
    }
}
