use std::collections::BTreeMap;

use common::SubmissionStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{bundle, patch_submission, pov_submission, sarif_assessment::Assessment};
use crate::error::AppError;

use super::shared::double_option;

/// Request body for submitting a proof of vulnerability.
#[derive(Deserialize, utoipa::ToSchema)]
pub struct PovRequest {
    /// Base64 testcase, at most 2 MiB decoded.
    pub testcase: String,
    /// Harness to run the testcase against.
    #[serde(alias = "fuzzer_name")]
    #[schema(example = "png_read_fuzzer")]
    pub harness: String,
    #[schema(example = "address")]
    pub sanitizer: String,
    #[schema(example = "x86_64")]
    pub architecture: String,
    #[schema(example = "libfuzzer")]
    pub engine: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct PovResponse {
    pub pov_id: Uuid,
    pub status: SubmissionStatus,
}

impl From<pov_submission::Model> for PovResponse {
    fn from(m: pov_submission::Model) -> Self {
        Self {
            pov_id: m.id,
            status: m.status,
        }
    }
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct PatchRequest {
    /// Base64 unified diff, at most 100 KiB decoded.
    pub patch: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct PatchResponse {
    pub patch_id: Uuid,
    pub status: SubmissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functionality_tests_passing: Option<bool>,
}

impl From<patch_submission::Model> for PatchResponse {
    fn from(m: patch_submission::Model) -> Self {
        Self {
            patch_id: m.id,
            status: m.status,
            functionality_tests_passing: m.functionality_tests_passing,
        }
    }
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct SarifRequest {
    /// A SARIF 2.1.0 log.
    #[schema(value_type = Object)]
    pub sarif: serde_json::Value,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct SarifResponse {
    pub submitted_sarif_id: Uuid,
    pub status: SubmissionStatus,
}

/// Structural checks on a SARIF log, reported per field.
pub fn validate_sarif(sarif: &serde_json::Value) -> Result<(), AppError> {
    let mut fields = BTreeMap::new();
    let Some(obj) = sarif.as_object() else {
        return Err(AppError::field("sarif", "must be a JSON object"));
    };
    match obj.get("version").and_then(|v| v.as_str()) {
        Some("2.1.0") => {}
        Some(other) => {
            fields.insert("sarif.version".into(), format!("unsupported version {other}"));
        }
        None => {
            fields.insert("sarif.version".into(), "is required".into());
        }
    }
    match obj.get("runs").and_then(|r| r.as_array()) {
        Some(runs) => {
            for (i, run) in runs.iter().enumerate() {
                let name = run
                    .pointer("/tool/driver/name")
                    .and_then(|n| n.as_str());
                if name.is_none_or(str::is_empty) {
                    fields.insert(
                        format!("sarif.runs[{i}].tool.driver.name"),
                        "is required".into(),
                    );
                }
                if let Some(results) = run.get("results")
                    && !results.is_array()
                {
                    fields.insert(format!("sarif.runs[{i}].results"), "must be an array".into());
                }
            }
        }
        None => {
            fields.insert("sarif.runs".into(), "must be an array".into());
        }
    }
    if fields.is_empty() {
        Ok(())
    } else {
        Err(AppError::InvalidFields(fields))
    }
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct AssessmentRequest {
    pub assessment: Assessment,
    /// Free-text justification.
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct FreeformRequest {
    /// Base64 payload, at most 2 MiB decoded.
    pub submission: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct FreeformResponse {
    pub freeform_id: Uuid,
    pub status: SubmissionStatus,
}

#[derive(Deserialize, utoipa::ToSchema, Default)]
pub struct BundleRequest {
    pub pov_id: Option<Uuid>,
    pub patch_id: Option<Uuid>,
    pub broadcast_sarif_id: Option<Uuid>,
    pub submitted_sarif_id: Option<Uuid>,
    pub freeform_id: Option<Uuid>,
    pub description: Option<String>,
}

/// PATCH body for a bundle. Absent fields keep their value, `null` clears.
#[derive(Deserialize, utoipa::ToSchema, Default)]
pub struct BundlePatchRequest {
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub pov_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub patch_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub broadcast_sarif_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub submitted_sarif_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub freeform_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

/// The referencing fields of a bundle after a create or update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleRefs {
    pub pov_id: Option<Uuid>,
    pub patch_id: Option<Uuid>,
    pub broadcast_sarif_id: Option<Uuid>,
    pub submitted_sarif_id: Option<Uuid>,
    pub freeform_id: Option<Uuid>,
    pub description: Option<String>,
}

impl BundleRefs {
    pub fn set_count(&self) -> usize {
        [
            self.pov_id.is_some(),
            self.patch_id.is_some(),
            self.broadcast_sarif_id.is_some(),
            self.submitted_sarif_id.is_some(),
            self.freeform_id.is_some(),
            self.description.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.set_count() < 2 {
            return Err(AppError::Validation(
                "a bundle must set at least two of pov_id, patch_id, broadcast_sarif_id, \
                 submitted_sarif_id, freeform_id, description"
                    .into(),
            ));
        }
        Ok(())
    }

    pub fn apply(&mut self, patch: BundlePatchRequest) {
        if let Some(v) = patch.pov_id {
            self.pov_id = v;
        }
        if let Some(v) = patch.patch_id {
            self.patch_id = v;
        }
        if let Some(v) = patch.broadcast_sarif_id {
            self.broadcast_sarif_id = v;
        }
        if let Some(v) = patch.submitted_sarif_id {
            self.submitted_sarif_id = v;
        }
        if let Some(v) = patch.freeform_id {
            self.freeform_id = v;
        }
        if let Some(v) = patch.description {
            self.description = v;
        }
    }
}

impl From<BundleRequest> for BundleRefs {
    fn from(r: BundleRequest) -> Self {
        Self {
            pov_id: r.pov_id,
            patch_id: r.patch_id,
            broadcast_sarif_id: r.broadcast_sarif_id,
            submitted_sarif_id: r.submitted_sarif_id,
            freeform_id: r.freeform_id,
            description: r.description,
        }
    }
}

impl From<&bundle::Model> for BundleRefs {
    fn from(m: &bundle::Model) -> Self {
        Self {
            pov_id: m.pov_id,
            patch_id: m.patch_id,
            broadcast_sarif_id: m.broadcast_sarif_id,
            submitted_sarif_id: m.submitted_sarif_id,
            freeform_id: m.freeform_id,
            description: m.description.clone(),
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct BundleResponse {
    pub bundle_id: Uuid,
    pub status: SubmissionStatus,
}

/// Every field of a bundle.
#[derive(Serialize, utoipa::ToSchema)]
pub struct BundleVerbose {
    pub bundle_id: Uuid,
    pub status: SubmissionStatus,
    pub pov_id: Option<Uuid>,
    pub patch_id: Option<Uuid>,
    pub broadcast_sarif_id: Option<Uuid>,
    pub submitted_sarif_id: Option<Uuid>,
    pub freeform_id: Option<Uuid>,
    pub description: Option<String>,
}

impl From<bundle::Model> for BundleVerbose {
    fn from(m: bundle::Model) -> Self {
        Self {
            bundle_id: m.id,
            status: m.status,
            pov_id: m.pov_id,
            patch_id: m.patch_id,
            broadcast_sarif_id: m.broadcast_sarif_id,
            submitted_sarif_id: m.submitted_sarif_id,
            freeform_id: m.freeform_id,
            description: m.description,
        }
    }
}
