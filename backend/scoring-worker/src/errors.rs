use thiserror::Error;

/// Failures raised by a [`crate::storage::TestStorage`] backend. All of them
/// are transient from the pipeline's point of view.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("BSON serialization error: {0}")]
    Serialization(#[from] mongodb::bson::ser::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("job serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a failed job. The worker runtime uses [`JobError::is_permanent`]
/// to choose between backoff-and-retry and dead-lettering.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("test {0} not found")]
    TestNotFound(String),

    #[error("test attempt {0} not found")]
    AttemptNotFound(String),

    #[error("test attempt {0} has no score yet")]
    AttemptNotScored(String),

    #[error("malformed job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl JobError {
    pub fn is_permanent(&self) -> bool {
        match self {
            JobError::TestNotFound(_)
            | JobError::AttemptNotFound(_)
            | JobError::AttemptNotScored(_)
            | JobError::Payload(_) => true,
            JobError::Storage(_) | JobError::Queue(_) => false,
        }
    }

    /// Short label used for metrics and dead-letter records.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::TestNotFound(_) => "test_not_found",
            JobError::AttemptNotFound(_) => "attempt_not_found",
            JobError::AttemptNotScored(_) => "attempt_not_scored",
            JobError::Payload(_) => "payload",
            JobError::Storage(_) => "storage",
            JobError::Queue(_) => "queue",
        }
    }
}
