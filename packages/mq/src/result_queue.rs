use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::eval::EvalMessage;
use tracing::debug;

use crate::error::MqError;
use crate::models::MqQueue;

/// Producer side of the evaluation result queue.
///
/// One evaluation has a single producer, so publish order is the order the
/// consumer sees unless the transport redelivers.
#[async_trait]
pub trait ResultQueue: Send + Sync {
    async fn publish(&self, message: &EvalMessage) -> Result<(), MqError>;
}

/// Publishes onto a broccoli queue.
pub struct BroccoliResultQueue {
    mq: Arc<MqQueue>,
    queue_name: String,
}

impl BroccoliResultQueue {
    pub fn new(mq: Arc<MqQueue>, queue_name: impl Into<String>) -> Self {
        Self {
            mq,
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl ResultQueue for BroccoliResultQueue {
    async fn publish(&self, message: &EvalMessage) -> Result<(), MqError> {
        self.mq
            .publish(&self.queue_name, None, message, None)
            .await?;
        debug!(
            queue = %self.queue_name,
            entity_id = %message.entity_id,
            msg_type = message.payload.kind(),
            "published result"
        );
        Ok(())
    }
}

/// Collects messages in memory.
#[derive(Clone, Default)]
pub struct MemoryResultQueue {
    messages: Arc<Mutex<Vec<EvalMessage>>>,
}

impl MemoryResultQueue {
    pub fn messages(&self) -> Vec<EvalMessage> {
        match self.messages.lock() {
            Ok(messages) => messages.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ResultQueue for MemoryResultQueue {
    async fn publish(&self, message: &EvalMessage) -> Result<(), MqError> {
        match self.messages.lock() {
            Ok(mut messages) => messages.push(message.clone()),
            Err(poisoned) => poisoned.into_inner().push(message.clone()),
        }
        Ok(())
    }
}
