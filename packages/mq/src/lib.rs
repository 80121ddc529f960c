pub mod error;
pub mod models;
pub mod result_queue;

pub use error::MqError;
pub use models::{BrokerMessage, BroccoliError, MqConfig, MqQueue, init_mq};
pub use result_queue::{BroccoliResultQueue, MemoryResultQueue, ResultQueue};

pub type Mq = MqQueue;
