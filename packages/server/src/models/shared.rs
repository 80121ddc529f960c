use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

/// Largest accepted patch, in decoded bytes.
pub const MAX_PATCH_BYTES: usize = 100 * 1024;
/// Largest accepted POV testcase or freeform payload, in decoded bytes.
pub const MAX_BLOB_BYTES: usize = 2 * 1024 * 1024;

/// Serde helper for PATCH semantics on nullable fields.
///
/// * JSON field absent  => `None`          (don't update)
/// * JSON field = null  => `Some(None)`    (set to NULL)
/// * JSON field = value => `Some(Some(v))` (set to value)
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

/// Decode a base64 request field and enforce its size limit.
pub fn decode_base64_field(field: &str, encoded: &str, max: usize) -> Result<Vec<u8>, AppError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| AppError::field(field, format!("not valid base64: {e}")))?;
    if bytes.len() > max {
        return Err(AppError::field(
            field,
            format!("decoded size {} exceeds {max} bytes", bytes.len()),
        ));
    }
    Ok(bytes)
}

/// Validate the length of a list for bulk operations.
pub fn validate_bulk_len(len: usize, name: &str, max: usize) -> Result<(), AppError> {
    if len == 0 {
        return Err(AppError::field(name, "must not be empty"));
    }
    if len > max {
        return Err(AppError::field(name, format!("at most {max} entries allowed")));
    }
    Ok(())
}

/// Minimal response carrying only a status.
#[derive(Serialize, utoipa::ToSchema)]
pub struct StatusResponse {
    #[schema(example = "accepted")]
    pub status: String,
}
