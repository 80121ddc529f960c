//! Structured audit trail.
//!
//! Audit events are separate from operational logs: each one is a single
//! JSON object on its own line, written to stdout by default. Downstream
//! tooling filters on `log_context == "audit"`.

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::submission_status::SubmissionStatus;

pub const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Good,
    Bad,
    Neutral,
}

impl Disposition {
    pub fn from_status(status: SubmissionStatus) -> Self {
        match status {
            SubmissionStatus::Passed => Self::Good,
            SubmissionStatus::Errored
            | SubmissionStatus::Failed
            | SubmissionStatus::DeadlineExceeded => Self::Bad,
            SubmissionStatus::Accepted | SubmissionStatus::Inconclusive => Self::Neutral,
        }
    }
}

/// What an archived blob is. Shared with the result queue's artifact
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArchivedFileKind {
    UnstrippedHeadTarball,
    UnstrippedBaseTarball,
    StrippedBaseTarball,
    FuzzToolingTarball,
    DiffTarball,
    PovTestcase,
    Patch,
    Sarif,
    Freeform,
    FuzzOutHead,
    FuzzOutBase,
    CommandStdout,
    CommandStderr,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanEvent {
    pub project_name: String,
    pub focus: String,
    pub repo_url: String,
    pub head_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,
    pub deadline_ms: i64,
    pub harnesses_included: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SarifBroadcastEvent {
    pub broadcast_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PovSubmissionEvent {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    pub testcase_sha256: String,
    pub harness: String,
    pub sanitizer: String,
    pub engine: String,
    pub architecture: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchSubmissionEvent {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    pub patch_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionResultEvent {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functionality_tests_passing: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SarifSubmissionEvent {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SarifAssessmentEvent {
    pub submission_id: Uuid,
    pub sarif_broadcast_id: Uuid,
    pub assessment: String,
    pub status: SubmissionStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BundleEvent {
    pub bundle_id: Uuid,
    pub status: SubmissionStatus,
    pub pov_id: Option<Uuid>,
    pub patch_id: Option<Uuid>,
    pub broadcast_sarif_id: Option<Uuid>,
    pub submitted_sarif_id: Option<Uuid>,
    pub freeform_id: Option<Uuid>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleDeleteEvent {
    pub bundle_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutOfBudgetEvent {
    pub competitor_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileArchivedEvent {
    pub kind: ArchivedFileKind,
    pub object_name: String,
    pub store: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrsStatusCheckEvent {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastEvent {
    pub method: String,
    pub route: String,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FreeformSubmissionEvent {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    pub payload_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", content = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    NewFullScan(ScanEvent),
    NewDeltaScan(ScanEvent),
    NewSarifBroadcast(SarifBroadcastEvent),
    PovSubmission(PovSubmissionEvent),
    PovSubmissionResult(SubmissionResultEvent),
    PatchSubmission(PatchSubmissionEvent),
    PatchSubmissionResult(SubmissionResultEvent),
    SarifSubmission(SarifSubmissionEvent),
    SarifAssessment(SarifAssessmentEvent),
    BundleSubmission(BundleEvent),
    BundleDelete(BundleDeleteEvent),
    OutOfBudget(OutOfBudgetEvent),
    FileArchived(FileArchivedEvent),
    CrsStatusCheck(CrsStatusCheckEvent),
    BroadcastSucceeded(BroadcastEvent),
    BroadcastFailed(BroadcastEvent),
    FreeformSubmission(FreeformSubmissionEvent),
}

impl AuditEvent {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::PovSubmission(e) => Disposition::from_status(e.status),
            Self::PatchSubmission(e) => Disposition::from_status(e.status),
            Self::PovSubmissionResult(e) | Self::PatchSubmissionResult(e) => {
                Disposition::from_status(e.status)
            }
            Self::SarifSubmission(e) => Disposition::from_status(e.status),
            Self::SarifAssessment(e) => Disposition::from_status(e.status),
            Self::BundleSubmission(e) => Disposition::from_status(e.status),
            Self::FreeformSubmission(e) => Disposition::from_status(e.status),
            Self::OutOfBudget(_) | Self::BroadcastFailed(_) => Disposition::Bad,
            Self::BroadcastSucceeded(_) => Disposition::Good,
            Self::NewFullScan(_)
            | Self::NewDeltaScan(_)
            | Self::NewSarifBroadcast(_)
            | Self::BundleDelete(_)
            | Self::FileArchived(_)
            | Self::CrsStatusCheck(_) => Disposition::Neutral,
        }
    }
}

/// Who and what an event is about.
#[derive(Debug, Clone, Default)]
pub struct AuditScope {
    pub round_id: Option<String>,
    pub team_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
}

impl AuditScope {
    pub fn task(task_id: Uuid) -> Self {
        Self {
            task_id: Some(task_id),
            ..Self::default()
        }
    }

    pub fn team(mut self, team_id: Uuid) -> Self {
        self.team_id = Some(team_id);
        self
    }

    pub fn round(mut self, round_id: impl Into<String>) -> Self {
        self.round_id = Some(round_id.into());
        self
    }
}

/// One serialized audit line.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub log_context: String,
    pub schema_version: String,
    pub round_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    pub disposition: Disposition,
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub event: AuditEvent,
}

type Sink = Box<dyn Write + Send>;

pub struct AuditLogger {
    default_round: String,
    sink: Mutex<Sink>,
}

impl AuditLogger {
    pub fn stdout(default_round: impl Into<String>) -> Self {
        Self::with_writer(default_round, Box::new(std::io::stdout()))
    }

    pub fn with_writer(default_round: impl Into<String>, sink: Sink) -> Self {
        Self {
            default_round: default_round.into(),
            sink: Mutex::new(sink),
        }
    }

    /// Logger writing into memory, for tests and for callers that collect
    /// events before forwarding them.
    pub fn in_memory(default_round: impl Into<String>) -> (Self, AuditBuffer) {
        let buffer = AuditBuffer::default();
        let logger = Self::with_writer(default_round, Box::new(buffer.clone()));
        (logger, buffer)
    }

    pub fn emit(&self, scope: &AuditScope, event: AuditEvent) {
        let record = AuditRecord {
            log_context: "audit".into(),
            schema_version: SCHEMA_VERSION.into(),
            round_id: scope
                .round_id
                .clone()
                .unwrap_or_else(|| self.default_round.clone()),
            team_id: scope.team_id,
            task_id: scope.task_id,
            disposition: event.disposition(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            event,
        };

        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, event = ?record.event, "failed to serialize audit event");
                return;
            }
        };
        line.push(b'\n');

        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = sink.write_all(&line).and_then(|_| sink.flush()) {
            error!(error = %e, "failed to write audit event");
        }
    }
}

/// Shared in-memory sink returned by [`AuditLogger::in_memory`].
#[derive(Clone, Default)]
pub struct AuditBuffer(Arc<Mutex<Vec<u8>>>);

impl AuditBuffer {
    /// Parse every line written so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        let data = match self.0.lock() {
            Ok(data) => data.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&data)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl Write for AuditBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.0.lock() {
            Ok(mut data) => data.extend_from_slice(buf),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(buf),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
