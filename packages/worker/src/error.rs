use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("MQ error: {0}")]
    Mq(#[from] mq::MqError),

    #[error("Storage error: {0}")]
    Storage(#[from] common::storage::StorageError),

    #[error("Credentials error: {0}")]
    Credentials(#[from] common::team::CredentialsError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Delivery(#[from] crate::delivery::DeliveryError),

    #[error(transparent)]
    Eval(#[from] crate::engine::EvalError),

    #[error(transparent)]
    Fetch(#[from] crate::fetch::FetchError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
