//! Message broker seam
//!
//! Three logical queues carry JSON task messages. Delivery is
//! at-least-once: a message is acknowledged only after the task returns
//! successfully, so tasks must be idempotent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Logical queue names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueName {
    DocumentsIngest,
    DocumentsRetry,
    SystemHealth,
}

impl QueueName {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DocumentsIngest => "documents.ingest",
            Self::DocumentsRetry => "documents.retry",
            Self::SystemHealth => "system.health",
        }
    }

    /// `x-max-priority` declared on the queue, when priority is enabled.
    #[must_use]
    pub const fn max_priority(self) -> Option<u8> {
        match self {
            Self::DocumentsIngest => Some(10),
            Self::DocumentsRetry | Self::SystemHealth => None,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON task message: a task name plus keyword arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task: String,
    pub kwargs: Value,
    #[serde(default)]
    pub priority: u8,
}

impl TaskMessage {
    #[must_use]
    pub fn new(task: impl Into<String>, kwargs: Value) -> Self {
        Self {
            task: task.into(),
            kwargs,
            priority: 0,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// A delivered message plus the tag needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: TaskMessage,
    pub tag: u64,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {message}")]
    Unavailable { message: String },

    #[error("unknown delivery tag: {tag}")]
    UnknownDelivery { tag: u64 },
}

/// Message broker with at-least-once delivery.
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Publish a message onto a queue.
    async fn publish(&self, queue: QueueName, message: TaskMessage) -> Result<(), BrokerError>;

    /// Receive the next message, if any. Higher-priority messages on
    /// priority-enabled queues are delivered first. The message stays
    /// in-flight until acknowledged or negatively acknowledged.
    async fn receive(&self, queue: QueueName) -> Result<Option<Delivery>, BrokerError>;

    /// Acknowledge a delivery after successful processing.
    async fn ack(&self, tag: u64) -> Result<(), BrokerError>;

    /// Return an in-flight delivery to its queue (worker crash, task
    /// failure before the retry path takes over).
    async fn nack(&self, tag: u64) -> Result<(), BrokerError>;
}
