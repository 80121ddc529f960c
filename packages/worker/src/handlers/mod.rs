pub mod broadcast;
pub mod cancel;
pub mod eval;
pub mod status;

use common::team::{CREDENTIALS_ENV, DeliveryTarget, decode_targets};

use crate::error::{Result, WorkerError};

/// Competitor endpoints handed to this job by the dispatcher.
pub fn load_targets() -> Result<Vec<DeliveryTarget>> {
    let encoded = std::env::var(CREDENTIALS_ENV)
        .map_err(|_| WorkerError::InvalidArgument(format!("{CREDENTIALS_ENV} is not set")))?;
    Ok(decode_targets(&encoded)?)
}
