use std::time::Duration;

use async_trait::async_trait;

use crate::errors::QueueError;
use crate::models::jobs::{Job, JobEnvelope, JobKind};

pub mod memory;
pub mod redis_queue;

pub use memory::InMemoryJobQueue;
pub use redis_queue::RedisJobQueue;

/// Producer side of the job queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, job: Job) -> Result<(), QueueError>;

    /// Enqueues every job or none of them.
    async fn publish_all(&self, jobs: Vec<Job>) -> Result<(), QueueError>;
}

/// A job taken off the pending list. `raw` is the exact serialized form
/// stored in the in-flight list and is needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: JobEnvelope,
    pub raw: String,
}

impl Delivery {
    pub fn from_raw(raw: String) -> Result<Self, serde_json::Error> {
        let envelope = serde_json::from_str(&raw)?;
        Ok(Self { envelope, raw })
    }
}

/// Consumer side of the job queue. A reserved job stays in flight until it
/// is acked, rescheduled or dead-lettered; `recover_in_flight` hands
/// abandoned deliveries back to the pending list.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn reserve(&self, kind: JobKind) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    async fn retry(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError>;

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    async fn recover_in_flight(&self, kind: JobKind) -> Result<usize, QueueError>;

    async fn depth(&self, kind: JobKind) -> Result<usize, QueueError>;
}

/// Dead-letter entry as stored by the queue backends. `envelope` is `None`
/// when the raw entry could not be parsed at all.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeadLetter {
    pub envelope: Option<JobEnvelope>,
    pub raw: String,
    pub reason: String,
    pub failed_at: chrono::DateTime<chrono::Utc>,
}

impl DeadLetter {
    pub fn for_delivery(delivery: &Delivery, reason: &str) -> Self {
        Self {
            envelope: Some(delivery.envelope.clone()),
            raw: delivery.raw.clone(),
            reason: reason.to_string(),
            failed_at: chrono::Utc::now(),
        }
    }

    pub fn unreadable(raw: String, error: &serde_json::Error) -> Self {
        Self {
            envelope: None,
            raw,
            reason: format!("unreadable job entry: {}", error),
            failed_at: chrono::Utc::now(),
        }
    }
}
